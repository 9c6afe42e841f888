//! Flag reconciliation module.

use crate::FlagBits;

/// Merges the tracked, local and remote flags of a message.
///
/// A flag set in the tracked baseline survives only if both sides
/// still have it. A flag cleared in the tracked baseline is set as
/// soon as one side has it.
pub fn merge(tracked: FlagBits, local: FlagBits, remote: FlagBits) -> FlagBits {
    (tracked & (local & remote)) | (!tracked & (local | remote))
}

#[cfg(test)]
mod tests {
    use crate::FlagBits;

    use super::merge;

    #[test]
    fn fixed_point() {
        for bits in 0..(1 << 5) {
            let x = FlagBits(bits);
            assert_eq!(merge(x, x, x), x);
        }
    }

    #[test]
    fn removal_wins() {
        let merged = merge(FlagBits::SEEN, FlagBits::EMPTY, FlagBits::SEEN);
        assert_eq!(merged, FlagBits::EMPTY);

        let merged = merge(FlagBits::SEEN, FlagBits::SEEN, FlagBits::EMPTY);
        assert_eq!(merged, FlagBits::EMPTY);
    }

    #[test]
    fn addition_wins() {
        let merged = merge(FlagBits::EMPTY, FlagBits::FLAGGED, FlagBits::ANSWERED);
        assert_eq!(merged, FlagBits::FLAGGED | FlagBits::ANSWERED);
    }

    #[test]
    fn untouched_sides_keep_their_changes() {
        let tracked = FlagBits::SEEN | FlagBits::DRAFT;
        let local = FlagBits::SEEN | FlagBits::DRAFT | FlagBits::FLAGGED;
        let remote = FlagBits::DRAFT;

        assert_eq!(
            merge(tracked, local, remote),
            FlagBits::DRAFT | FlagBits::FLAGGED
        );
    }
}
