//! Block subsidy schedule: a halving emission curve.

/// Initial subsidy, in the smallest unit: 50 whole coins at 1e8 per coin.
pub const INITIAL_SUBSIDY: i64 = 50 * 100_000_000;
/// Blocks between halvings.
pub const HALVING_INTERVAL: u32 = 210_000;

/// `block_subsidy(height)`: halves every `HALVING_INTERVAL` blocks, going to
/// zero once the subsidy has halved past the width of the integer (mirrors
/// the point at which further halving would mint nothing).
pub fn block_subsidy(height: u32) -> i64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    INITIAL_SUBSIDY >> halvings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_era_pays_full_subsidy() {
        assert_eq!(block_subsidy(0), INITIAL_SUBSIDY);
        assert_eq!(block_subsidy(1), INITIAL_SUBSIDY);
    }

    #[test]
    fn halves_on_schedule() {
        assert_eq!(block_subsidy(HALVING_INTERVAL), INITIAL_SUBSIDY / 2);
        assert_eq!(block_subsidy(HALVING_INTERVAL * 2), INITIAL_SUBSIDY / 4);
    }

    #[test]
    fn eventually_reaches_zero() {
        assert_eq!(block_subsidy(HALVING_INTERVAL * 64), 0);
    }
}
