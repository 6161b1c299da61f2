use super::chain::Block;
use tracing::debug;

/// Difficulty of the first block and of any chain too short to retarget.
pub const DEFAULT_DIFFICULTY: u32 = 2;
/// Difficulty is recomputed whenever the height is a multiple of this.
pub const RETARGET_INTERVAL: u64 = 5;
pub const TARGET_BLOCK_TIME_SECS: i64 = 120;
pub const TOLERANCE_SECS: i64 = 120;
pub const MIN_DIFFICULTY: u32 = 1;

/// Adjusts `current` from the time spanned by `recent`, newest block first.
///
/// The span between the newest and the oldest block covers `len - 1` block
/// intervals. Running faster than that allows (minus tolerance) raises the
/// difficulty by one; running slower lowers it by one.
pub fn retarget(current: u32, recent: &[Block]) -> u32 {
    let (Some(newest), Some(oldest)) = (recent.first(), recent.last()) else {
        return current;
    };
    if recent.len() < 2 {
        return current;
    }

    let actual = newest.timestamp - oldest.timestamp;
    let expected = (recent.len() as i64 - 1) * TARGET_BLOCK_TIME_SECS;

    let next = if actual < expected - TOLERANCE_SECS {
        current.saturating_add(1)
    } else if actual > expected + TOLERANCE_SECS {
        current.saturating_sub(1).max(MIN_DIFFICULTY)
    } else {
        current
    };

    debug!(actual, expected, current, next, "difficulty.retarget");
    next
}
