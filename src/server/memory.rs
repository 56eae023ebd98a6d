//! Server memory self-governance
//!
//! The server treats itself as disposable rather than bounding allocator
//! growth: above a warning threshold it logs (rate-limited to one warning
//! per 5 minutes); above a restart threshold it asks the caller to spawn a
//! replacement process and exit.

use std::time::{Duration, Instant};

/// Minimum spacing between memory warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(300);

/// Outcome of one memory poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAction {
    Ok,
    /// Above the warning threshold (logged at most once per 5 minutes)
    Warned,
    /// Above the restart threshold; spawn a replacement and exit
    Restart,
}

/// Threshold tracker; one instance per server process.
pub struct MemoryGovernor {
    warn_bytes: u64,
    restart_bytes: u64,
    last_warn: Option<Instant>,
}

impl MemoryGovernor {
    pub fn new(warn_bytes: u64, restart_bytes: u64) -> MemoryGovernor {
        MemoryGovernor {
            warn_bytes,
            restart_bytes,
            last_warn: None,
        }
    }

    /// Evaluate an observed RSS value.
    pub fn observe(&mut self, rss_bytes: u64) -> MemoryAction {
        if rss_bytes >= self.restart_bytes {
            tracing::warn!(
                rss = rss_bytes,
                threshold = self.restart_bytes,
                "Memory above restart threshold, handing off to replacement"
            );
            return MemoryAction::Restart;
        }
        if rss_bytes >= self.warn_bytes {
            let due = self
                .last_warn
                .map(|t| t.elapsed() >= WARN_INTERVAL)
                .unwrap_or(true);
            if due {
                self.last_warn = Some(Instant::now());
                tracing::warn!(
                    rss = rss_bytes,
                    threshold = self.warn_bytes,
                    "Memory above warning threshold"
                );
                return MemoryAction::Warned;
            }
        }
        MemoryAction::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_thresholds() {
        let mut gov = MemoryGovernor::new(100, 200);
        assert_eq!(gov.observe(50), MemoryAction::Ok);
    }

    #[test]
    fn test_warning_rate_limited() {
        let mut gov = MemoryGovernor::new(100, 200);
        assert_eq!(gov.observe(150), MemoryAction::Warned);
        // Immediately again: suppressed
        assert_eq!(gov.observe(150), MemoryAction::Ok);
    }

    #[test]
    fn test_restart_always_fires() {
        let mut gov = MemoryGovernor::new(100, 200);
        assert_eq!(gov.observe(250), MemoryAction::Restart);
        assert_eq!(gov.observe(250), MemoryAction::Restart);
    }

    #[test]
    fn test_warn_after_interval() {
        let mut gov = MemoryGovernor::new(100, 200);
        assert_eq!(gov.observe(150), MemoryAction::Warned);
        // Simulate elapsed interval
        gov.last_warn = Some(Instant::now() - WARN_INTERVAL - Duration::from_secs(1));
        assert_eq!(gov.observe(150), MemoryAction::Warned);
    }
}
