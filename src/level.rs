//! Experience to level conversion

/// Experience needed per squared level step.
pub const EXPERIENCE_PER_LEVEL_STEP: u64 = 100;

/// Level reached with the given experience: `floor(sqrt(experience / 100)) + 1`.
///
/// Total and monotonic. `floor(sqrt(x))` equals `isqrt(floor(x))` for any
/// non-negative real `x`, so integer arithmetic gives the exact answer.
///
/// ```rust
/// use paddock::level;
///
/// assert_eq!(level(0), 1);
/// assert_eq!(level(99), 1);
/// assert_eq!(level(100), 2);
/// assert_eq!(level(400), 3);
/// ```
pub fn level(experience: u64) -> u32 {
    // isqrt of a u64 always fits in 32 bits
    (experience / EXPERIENCE_PER_LEVEL_STEP).isqrt() as u32 + 1
}

/// Minimum experience required to reach `level`.
pub fn experience_for_level(level: u32) -> u64 {
    let steps = level.saturating_sub(1) as u64;
    steps.saturating_mul(steps).saturating_mul(EXPERIENCE_PER_LEVEL_STEP)
}
