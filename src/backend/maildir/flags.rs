use crate::FlagBits;

pub fn from_char(c: char) -> FlagBits {
    match c {
        'r' | 'R' => FlagBits::ANSWERED,
        's' | 'S' => FlagBits::SEEN,
        't' | 'T' => FlagBits::DELETED,
        'd' | 'D' => FlagBits::DRAFT,
        'f' | 'F' => FlagBits::FLAGGED,
        _ => FlagBits::EMPTY,
    }
}

pub fn from_chars(flags: &str) -> FlagBits {
    flags
        .chars()
        .fold(FlagBits::EMPTY, |bits, c| bits | from_char(c))
}

/// Builds the info part of a maildir file name. Maildir flags must be
/// sorted in ASCII order.
pub fn to_normalized_string(bits: FlagBits) -> String {
    [
        (FlagBits::DRAFT, 'D'),
        (FlagBits::FLAGGED, 'F'),
        (FlagBits::ANSWERED, 'R'),
        (FlagBits::SEEN, 'S'),
        (FlagBits::DELETED, 'T'),
    ]
    .into_iter()
    .filter(|(bit, _)| bits.contains(*bit))
    .map(|(_, c)| c)
    .collect()
}

#[cfg(test)]
mod tests {
    use crate::FlagBits;

    #[test]
    fn normalized_string() {
        let bits = FlagBits::SEEN | FlagBits::DRAFT | FlagBits::ANSWERED;
        assert_eq!(super::to_normalized_string(bits), "DRS");
        assert_eq!(super::from_chars("DRSp"), bits);
        assert_eq!(super::to_normalized_string(FlagBits::EMPTY), "");
    }
}
