// crates/sve2-core/src/time.rs
//
// Monotonic nanosecond clock and the deadline type shared by every blocking
// API in the engine (bounded channel send/recv, decoder wait_for_seek, ...).

use std::time::{Duration, Instant};

/// All timestamps above the codec layer are signed ns on one monotonic base.
pub const NS_PER_SEC: i64 = 1_000_000_000;

/// A point in time (or lack of one) that a blocking call should give up at.
///
/// `Now` polls without blocking; `Infinite` waits forever; `At` is an
/// absolute point on the process's monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Now,
    Infinite,
    At(Instant),
}

impl Deadline {
    pub fn after(d: Duration) -> Self {
        Deadline::At(Instant::now() + d)
    }

    /// Remaining wait budget, or `None` if the deadline has already passed.
    /// `Infinite` never returns `None`.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Deadline::Now => Some(Duration::ZERO),
            Deadline::Infinite => Some(Duration::from_secs(u64::MAX / 2)),
            Deadline::At(t) => t.checked_duration_since(Instant::now()).or(Some(Duration::ZERO)),
        }
    }

    pub fn has_elapsed(&self) -> bool {
        match self {
            Deadline::Now => true,
            Deadline::Infinite => false,
            Deadline::At(t) => Instant::now() >= *t,
        }
    }
}

/// Rebases `pts` from the container's rational time base (`num`/`den`) to ns.
///
/// Uses 128-bit intermediate arithmetic (`pts * num * NS_PER_SEC / den`) so
/// high sample-rate time bases (e.g. `1 / (48000*48000)`) never overflow a
/// 64-bit intermediate. Rounds to nearest.
pub fn rebase_to_ns(pts: i64, num: i32, den: i32) -> i64 {
    let pts = pts as i128;
    let num = num as i128;
    let den = den as i128;
    let ns = NS_PER_SEC as i128;

    let numerator = pts * num * ns;
    let half_den = den / 2;
    let rounded = if numerator >= 0 {
        (numerator + half_den) / den
    } else {
        (numerator - half_den) / den
    };
    rounded as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_identity_when_already_ns() {
        assert_eq!(rebase_to_ns(5, 1, 1) , 5 * NS_PER_SEC);
    }

    #[test]
    fn rebase_matches_simple_fraction() {
        // 1 sample at 48000 Hz = 1/48000 s = 20833.33.. us -> rounds to 20833333 ns
        let got = rebase_to_ns(1, 1, 48000);
        assert_eq!(got, 20_833_333);
    }

    #[test]
    fn rebase_does_not_overflow_large_den() {
        // From spec S6: pts = 2^40, num = 1, den = 48000*48000
        let pts: i64 = 1i64 << 40;
        let den: i64 = 48000 * 48000;
        let got = rebase_to_ns(pts, 1, den as i32);

        let reference = {
            let pts = pts as i128;
            let ns = NS_PER_SEC as i128;
            let den = den as i128;
            (pts * ns / den) as i64
        };
        assert_eq!(got, reference);
    }

    #[test]
    fn rebase_handles_negative_pts() {
        let got = rebase_to_ns(-1, 1, 48000);
        assert_eq!(got, -20_833_333);
    }

    #[test]
    fn deadline_now_has_zero_remaining() {
        assert_eq!(Deadline::Now.remaining(), Some(Duration::ZERO));
        assert!(Deadline::Now.has_elapsed());
    }

    #[test]
    fn deadline_infinite_never_elapses() {
        assert!(!Deadline::Infinite.has_elapsed());
    }

    #[test]
    fn deadline_at_future_point_has_not_elapsed() {
        let d = Deadline::after(Duration::from_secs(60));
        assert!(!d.has_elapsed());
        assert!(d.remaining().unwrap() > Duration::from_secs(30));
    }
}
