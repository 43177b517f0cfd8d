//! Fixed-format MRZ text parsing and validation.
//!
//! The document variant is guessed purely from line count and length, the
//! per-variant fields are sliced at fixed offsets, and validity is scored
//! from the check digits, the original line lengths and a few structural
//! checks. Malformed input never fails: it degrades to a record with
//! `mrz_type = None` and a zero score.

pub mod checksum;
pub mod cleaner;

use chrono::NaiveDate;

pub use crate::core::record::{MrzRecord, MrzType};
use checksum::check_digit_matches;

pub const FILLER: char = '<';

/// Guesses the variant from line count and lengths. Two-line documents
/// starting with 'V' are the visa variants of the same shape.
pub fn guess_type(lines: &[String]) -> Option<MrzType> {
    match lines {
        [a, b] => {
            let first = a.chars().next()?;
            let first_is_v = first.to_ascii_uppercase() == 'V';
            if a.chars().count() < 40 && b.chars().count() < 40 {
                Some(if first_is_v { MrzType::Mrvb } else { MrzType::Td2 })
            } else if first_is_v {
                Some(MrzType::Mrva)
            } else {
                Some(MrzType::Td3)
            }
        }
        [_, _, _] => Some(MrzType::Td1),
        _ => None,
    }
}

/// Parses MRZ lines into a record. Short lines are right-padded with the
/// filler to the variant's canonical length before slicing; the original
/// lengths feed the line-length validity vector.
pub fn parse(lines: &[String]) -> MrzRecord {
    let Some(tp) = guess_type(lines) else {
        return MrzRecord::invalid();
    };
    match tp {
        MrzType::Td1 => parse_td1(&lines[0], &lines[1], &lines[2]),
        MrzType::Td2 => parse_td2(&lines[0], &lines[1]),
        MrzType::Td3 => parse_td3(&lines[0], &lines[1]),
        MrzType::Mrva => parse_mrv(&lines[0], &lines[1], MrzType::Mrva, 44),
        MrzType::Mrvb => parse_mrv(&lines[0], &lines[1], MrzType::Mrvb, 36),
    }
}

/// Cleans a raw OCR string and parses the result, recording the raw text
/// in the record's provenance bag.
pub fn from_ocr(raw: &str) -> MrzRecord {
    let lines = cleaner::clean(raw);
    let mut record = parse(&lines);
    record.aux.insert("raw_text".to_string(), raw.to_string());
    record
}

/// A line padded to its canonical length, indexable by character position.
struct Line {
    chars: Vec<char>,
    original_len: usize,
}

impl Line {
    fn new(line: &str, canonical_len: usize) -> Self {
        let mut chars: Vec<char> = line.chars().collect();
        let original_len = chars.len();
        while chars.len() < canonical_len {
            chars.push(FILLER);
        }
        Line { chars, original_len }
    }

    fn slice(&self, range: std::ops::Range<usize>) -> String {
        self.chars[range].iter().collect()
    }

    fn at(&self, idx: usize) -> char {
        self.chars[idx]
    }

    fn has_expected_len(&self, len: usize) -> bool {
        self.original_len == len
    }
}

/// Splits a name block on the first double filler into surname and given
/// names, with remaining fillers turned into spaces.
fn split_names(block: &str) -> (String, String) {
    let (surname, names) = match block.split_once("<<") {
        Some((s, n)) => (s, n),
        None => (block, ""),
    };
    (
        surname.replace(FILLER, " ").trim().to_string(),
        names.replace(FILLER, " ").trim().to_string(),
    )
}

fn is_real_date(ymd: &str) -> bool {
    NaiveDate::parse_from_str(ymd, "%y%m%d").is_ok()
}

/// Combines the validity vectors into the 0..=100 score. Ten points per
/// check digit, one per line length and misc check, plus one so that a
/// structurally recognized record never scores exactly zero; `max` is the
/// per-variant normalizer that maps an all-valid record to 100.
fn score(check_digits: &[bool], line_lengths: &[bool], misc: &[bool], max: u32) -> u8 {
    let points = 10 * count(check_digits) + count(line_lengths) + count(misc) + 1;
    (100 * points / max) as u8
}

fn count(flags: &[bool]) -> u32 {
    flags.iter().filter(|f| **f).count() as u32
}

fn parse_td1(a: &str, b: &str, c: &str) -> MrzRecord {
    let (a, b, c) = (Line::new(a, 30), Line::new(b, 30), Line::new(c, 30));
    let mut r = MrzRecord {
        mrz_type: Some(MrzType::Td1),
        ..MrzRecord::default()
    };
    r.doc_type = a.slice(0..2);
    r.country = a.slice(2..5);
    r.number = a.slice(5..14);
    r.check_number = a.at(14).to_string();
    r.optional1 = Some(a.slice(15..30));
    r.date_of_birth = b.slice(0..6);
    r.check_date_of_birth = b.at(6).to_string();
    r.sex = b.at(7).to_string();
    r.expiration_date = b.slice(8..14);
    r.check_expiration_date = b.at(14).to_string();
    r.nationality = b.slice(15..18);
    r.optional2 = Some(b.slice(18..29));
    r.check_composite = Some(b.at(29).to_string());
    (r.surname, r.names) = split_names(&c.slice(0..30));

    let composite = format!("{}{}{}{}", a.slice(5..30), b.slice(0..7), b.slice(8..15), b.slice(18..29));
    r.valid_check_digits = vec![
        check_digit_matches(&r.number, a.at(14)),
        check_digit_matches(&r.date_of_birth, b.at(6)) && is_real_date(&r.date_of_birth),
        check_digit_matches(&r.expiration_date, b.at(14)) && is_real_date(&r.expiration_date),
        check_digit_matches(&composite, b.at(29)),
    ];
    r.valid_line_lengths = vec![
        a.has_expected_len(30),
        b.has_expected_len(30),
        c.has_expected_len(30),
    ];
    r.valid_misc = vec![matches!(a.at(0), 'I' | 'A' | 'C')];
    r.valid_score = score(&r.valid_check_digits, &r.valid_line_lengths, &r.valid_misc, 45);
    r.valid = r.valid_score == 100;
    r
}

fn parse_td2(a: &str, b: &str) -> MrzRecord {
    let (a, b) = (Line::new(a, 36), Line::new(b, 36));
    let mut r = MrzRecord {
        mrz_type: Some(MrzType::Td2),
        ..MrzRecord::default()
    };
    r.doc_type = a.slice(0..2);
    r.country = a.slice(2..5);
    (r.surname, r.names) = split_names(&a.slice(5..36));
    r.number = b.slice(0..9);
    r.check_number = b.at(9).to_string();
    r.nationality = b.slice(10..13);
    r.date_of_birth = b.slice(13..19);
    r.check_date_of_birth = b.at(19).to_string();
    r.sex = b.at(20).to_string();
    r.expiration_date = b.slice(21..27);
    r.check_expiration_date = b.at(27).to_string();
    r.optional1 = Some(b.slice(28..35));
    r.check_composite = Some(b.at(35).to_string());

    let composite = format!("{}{}{}", b.slice(0..10), b.slice(13..20), b.slice(21..35));
    r.valid_check_digits = vec![
        check_digit_matches(&r.number, b.at(9)),
        check_digit_matches(&r.date_of_birth, b.at(19)) && is_real_date(&r.date_of_birth),
        check_digit_matches(&r.expiration_date, b.at(27)) && is_real_date(&r.expiration_date),
        check_digit_matches(&composite, b.at(35)),
    ];
    r.valid_line_lengths = vec![a.has_expected_len(36), b.has_expected_len(36)];
    r.valid_misc = vec![matches!(a.at(0), 'A' | 'C' | 'I')];
    r.valid_score = score(&r.valid_check_digits, &r.valid_line_lengths, &r.valid_misc, 44);
    r.valid = r.valid_score == 100;
    r
}

fn parse_td3(a: &str, b: &str) -> MrzRecord {
    let (a, b) = (Line::new(a, 44), Line::new(b, 44));
    let mut r = MrzRecord {
        mrz_type: Some(MrzType::Td3),
        ..MrzRecord::default()
    };
    r.doc_type = a.slice(0..2);
    r.country = a.slice(2..5);
    (r.surname, r.names) = split_names(&a.slice(5..44));
    r.number = b.slice(0..9);
    r.check_number = b.at(9).to_string();
    r.nationality = b.slice(10..13);
    r.date_of_birth = b.slice(13..19);
    r.check_date_of_birth = b.at(19).to_string();
    r.sex = b.at(20).to_string();
    r.expiration_date = b.slice(21..27);
    r.check_expiration_date = b.at(27).to_string();
    r.personal_number = Some(b.slice(28..42));
    r.check_personal_number = Some(b.at(42).to_string());
    r.check_composite = Some(b.at(43).to_string());

    let personal_number = b.slice(28..42);
    // The personal-number check digit is optional: a filler or '0' is
    // accepted when the field itself is entirely filler.
    let personal_number_ok = (matches!(b.at(42), '<' | '0')
        && personal_number == "<".repeat(14))
        || check_digit_matches(&personal_number, b.at(42));

    let composite = format!("{}{}{}", b.slice(0..10), b.slice(13..20), b.slice(21..43));
    r.valid_check_digits = vec![
        check_digit_matches(&r.number, b.at(9)),
        check_digit_matches(&r.date_of_birth, b.at(19)) && is_real_date(&r.date_of_birth),
        check_digit_matches(&r.expiration_date, b.at(27)) && is_real_date(&r.expiration_date),
        check_digit_matches(&composite, b.at(43)),
        personal_number_ok,
    ];
    r.valid_line_lengths = vec![a.has_expected_len(44), b.has_expected_len(44)];
    r.valid_misc = vec![a.at(0) == 'P'];
    r.valid_score = score(&r.valid_check_digits, &r.valid_line_lengths, &r.valid_misc, 54);
    r.valid = r.valid_score == 100;
    r
}

fn parse_mrv(a: &str, b: &str, tp: MrzType, len: usize) -> MrzRecord {
    let (a, b) = (Line::new(a, len), Line::new(b, len));
    let mut r = MrzRecord {
        mrz_type: Some(tp),
        ..MrzRecord::default()
    };
    r.doc_type = a.slice(0..2);
    r.country = a.slice(2..5);
    (r.surname, r.names) = split_names(&a.slice(5..len));
    r.number = b.slice(0..9);
    r.check_number = b.at(9).to_string();
    r.nationality = b.slice(10..13);
    r.date_of_birth = b.slice(13..19);
    r.check_date_of_birth = b.at(19).to_string();
    r.sex = b.at(20).to_string();
    r.expiration_date = b.slice(21..27);
    r.check_expiration_date = b.at(27).to_string();
    r.optional1 = Some(b.slice(28..len));

    r.valid_check_digits = vec![
        check_digit_matches(&r.number, b.at(9)),
        check_digit_matches(&r.date_of_birth, b.at(19)),
        check_digit_matches(&r.expiration_date, b.at(27)),
    ];
    r.valid_line_lengths = vec![a.has_expected_len(len), b.has_expected_len(len)];
    r.valid_misc = vec![a.at(0) == 'V'];
    r.valid_score = score(&r.valid_check_digits, &r.valid_line_lengths, &r.valid_misc, 34);
    r.valid = r.valid_score == 100;
    r
}
