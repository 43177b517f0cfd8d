//! Deterministic cleanup of raw OCR output before parsing.
//!
//! The cleaner is a per-position table lookup driven by the character class
//! each MRZ variant allows at a given line/column, not a spelling model:
//! alphabetic positions fix digit lookalikes, numeric positions fix letter
//! lookalikes, mixed positions are left alone.

use crate::parse::{guess_type, MrzType};

/// Character class allowed at one MRZ position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Alpha,
    AlphaFiller,
    Num,
    NumFiller,
    Any,
}

fn mask(runs: &[(CharClass, usize)]) -> Vec<CharClass> {
    let mut out = Vec::new();
    for (class, count) in runs {
        out.extend(std::iter::repeat(*class).take(*count));
    }
    out
}

fn format_masks(tp: MrzType) -> Vec<Vec<CharClass>> {
    use CharClass::*;
    match tp {
        MrzType::Td1 => vec![
            mask(&[(Alpha, 1), (Any, 1), (AlphaFiller, 3), (Any, 9), (NumFiller, 1), (Any, 15)]),
            mask(&[(Num, 7), (AlphaFiller, 1), (Num, 7), (AlphaFiller, 3), (Any, 11), (Num, 1)]),
            mask(&[(AlphaFiller, 30)]),
        ],
        MrzType::Td2 => vec![
            mask(&[(Alpha, 1), (AlphaFiller, 35)]),
            mask(&[(Any, 9), (Num, 1), (AlphaFiller, 3), (Num, 7), (AlphaFiller, 1), (Num, 7), (Any, 7), (Num, 1)]),
        ],
        MrzType::Td3 => vec![
            mask(&[(Alpha, 1), (AlphaFiller, 43)]),
            mask(&[(Any, 9), (Num, 1), (AlphaFiller, 3), (Num, 7), (AlphaFiller, 1), (Num, 7), (Any, 14), (Num, 2)]),
        ],
        MrzType::Mrva | MrzType::Mrvb => vec![
            mask(&[(Alpha, 1), (AlphaFiller, 43)]),
            mask(&[(Any, 9), (Num, 1), (AlphaFiller, 3), (Num, 7), (AlphaFiller, 1), (Num, 7), (Any, 16)]),
        ],
    }
}

fn fix_to_letter(c: char) -> char {
    match c {
        '0' => 'O',
        '1' => 'I',
        '2' => 'Z',
        '4' => 'A',
        '5' => 'S',
        '6' => 'G',
        '8' => 'B',
        _ => c,
    }
}

fn fix_to_digit(c: char) -> char {
    match c {
        'B' => '8',
        'C' => '0',
        'D' => '0',
        'G' => '6',
        'I' => '1',
        'O' => '0',
        'Q' => '0',
        'S' => '5',
        'Z' => '2',
        _ => c,
    }
}

fn fix_char(c: char, class: CharClass) -> char {
    let c = c.to_ascii_uppercase();
    match class {
        CharClass::Alpha | CharClass::AlphaFiller => fix_to_letter(c),
        CharClass::Num | CharClass::NumFiller => fix_to_digit(c),
        CharClass::Any => c,
    }
}

/// Minimum line length for a candidate MRZ line; shorter lines are noise
/// unless they contain the filler pair.
const MIN_LINE_LEN: usize = 20;

fn split_lines(raw: &str) -> Vec<String> {
    raw.split('\n')
        .map(|line| line.replace(' ', ""))
        .filter(|line| line.chars().count() >= MIN_LINE_LEN || line.contains("<<"))
        .collect()
}

/// Splits raw OCR output into candidate MRZ lines and repairs per-position
/// character confusions. Lines are returned unfixed when no variant could
/// be guessed from their shape; positions beyond a variant's known field
/// map are left untouched.
pub fn clean(raw: &str) -> Vec<String> {
    let mut lines = split_lines(raw);
    let Some(tp) = guess_type(&lines) else {
        return lines;
    };
    let masks = format_masks(tp);
    for (i, line) in lines.iter_mut().enumerate() {
        let mask = &masks[i];
        *line = line
            .chars()
            .enumerate()
            .map(|(j, c)| match mask.get(j) {
                Some(class) => fix_char(c, *class),
                None => c,
            })
            .collect();
    }
    lines
}
