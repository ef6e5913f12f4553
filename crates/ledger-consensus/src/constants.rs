//! Central consensus constants.

pub const TX_WIRE_VERSION: i32 = 2;
pub const BLOCK_WIRE_VERSION: i32 = 1;

/// 21e6 * 1e8, the maximum representable amount in the smallest unit.
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

pub const MAX_TX_SIZE: usize = 1_000_000;
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
pub const MAX_BLOCK_SIZE: usize = 4_000_000;
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;
pub const MAX_BLOCK_SIGOPS: u64 = 20_000;

pub const COINBASE_MATURITY: u32 = 100;

/// Median-time-past window, in block headers.
pub const MEDIAN_TIME_SPAN: usize = 11;
/// Maximum allowed drift of a header's timestamp into the future.
pub const MAX_FUTURE_SKEW: u32 = 2 * 60 * 60;

/// Blocks between difficulty retargets.
pub const DIFFICULTY_INTERVAL: u64 = 2016;
/// Target seconds between blocks.
pub const TARGET_SPACING: u64 = 600;

pub const MEMPOOL_MAX_ANCESTORS: usize = 25;
pub const MEMPOOL_MAX_ANCESTOR_SIZE: usize = 101_000;
pub const MEMPOOL_MAX_DESCENDANTS: usize = 25;
pub const MEMPOOL_MAX_DESCENDANT_SIZE: usize = 101_000;
pub const MEMPOOL_MAX_RBF_REPLACED: usize = 100;

/// Script interpreter limits (see the script module).
pub const MAX_SCRIPT_STACK_ITEMS: usize = 1000;
pub const MAX_SCRIPT_ITEM_BYTES: usize = 520;
pub const MAX_SCRIPT_BYTES: usize = 10_000;
pub const MAX_SCRIPT_OPS: usize = 201;
