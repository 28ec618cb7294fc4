use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// One-time process-wide setup. Safe to call any number of times.
///
/// Fixes the monotonic epoch that time synchronization reports against.
pub fn initialize() {
    EPOCH.get_or_init(|| {
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "visionlink initialized");
        Instant::now()
    });
}

/// Time since [`initialize`], initializing first if needed.
pub fn monotonic_now() -> Duration {
    EPOCH.get_or_init(Instant::now).elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        initialize();
        let first = monotonic_now();
        initialize();
        let second = monotonic_now();
        assert!(second >= first);
    }
}
