/// The MRZ check digit: each character's value (digits map to themselves,
/// A-Z to 10..35, the filler `<` to 0) is weighted by the cycle 7, 3, 1 and
/// the sum is taken mod 10.
///
/// Returns `None` for an empty input or when any character is outside the
/// MRZ alphabet, in which case no digit can match.
pub fn check_digit(text: &str) -> Option<char> {
    if text.is_empty() {
        return None;
    }
    const WEIGHTS: [u32; 3] = [7, 3, 1];
    let mut sum: u32 = 0;
    for (i, c) in text.chars().enumerate() {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'A'..='Z' => c as u32 - 'A' as u32 + 10,
            '<' => 0,
            _ => return None,
        };
        sum += value * WEIGHTS[i % 3];
    }
    char::from_digit(sum % 10, 10)
}

/// Convenience comparison against the check digit character found in the MRZ.
pub fn check_digit_matches(text: &str, digit: char) -> bool {
    check_digit(text) == Some(digit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(check_digit("0"), Some('0'));
        assert_eq!(check_digit("0000000000"), Some('0'));
        assert_eq!(check_digit("00A0A<0A0<<0A0A0<0A"), Some('0'));
        assert_eq!(check_digit("111111111"), Some('3'));
        assert_eq!(check_digit("111<<<111111"), Some('3'));
        assert_eq!(check_digit("BBB<<<1B1<<<BB1"), Some('3'));
        assert_eq!(check_digit("1<<1<<1<<1"), Some('8'));
        assert_eq!(check_digit("BCDEFGHIJ"), check_digit("123456789"));
    }

    #[test]
    fn rejects_out_of_alphabet_input() {
        assert_eq!(check_digit(""), None);
        assert_eq!(check_digit("0000 0"), None);
        assert_eq!(check_digit("onlylowercase"), None);
        assert_eq!(check_digit("BBb<<<1B1<<<BB1"), None);
    }

    #[test]
    fn matching_helper() {
        assert!(check_digit_matches("111111111", '3'));
        assert!(!check_digit_matches("111111111", '4'));
        assert!(!check_digit_matches("0 0", '0'));
    }
}
