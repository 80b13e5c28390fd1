//! Communication failure accounting with throttled reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Start limiting after this many failures in a row.
pub const ERR_LIMIT: u32 = 10;
/// Then only report every n-th failure.
pub const ERR_RATE: u32 = 10;

/// Set once the process starts shutting down on purpose.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a failure report ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReport {
    /// Shutdown in progress, nothing recorded.
    Ignored,
    /// The failure was logged; `throttle_notice` when the "limiting" warning went out too.
    Logged { throttle_notice: bool },
    /// Past the limit: logging suppressed, the caller should reconnect.
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct FailureTracker {
    failures: u32,
    limit: u32,
    rate: u32,
    shutdown: ShutdownToken,
}

impl FailureTracker {
    pub fn new(shutdown: ShutdownToken) -> Self {
        Self::with_limits(ERR_LIMIT, ERR_RATE, shutdown)
    }

    pub fn with_limits(limit: u32, rate: u32, shutdown: ShutdownToken) -> Self {
        Self {
            failures: 0,
            limit: limit.max(1),
            rate: rate.max(1),
            shutdown,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns true when this call ended a run of failures.
    pub fn report_good(&mut self) -> bool {
        if self.failures == 0 {
            return false;
        }
        info!("Communications with UPS re-established");
        self.failures = 0;
        true
    }

    pub fn report_failure(&mut self, detail: Option<&str>) -> FailureReport {
        if self.shutdown.is_triggered() {
            return FailureReport::Ignored;
        }

        self.failures = self.failures.saturating_add(1);

        let throttle_notice = self.failures == self.limit || self.failures % self.rate == 0;
        if throttle_notice {
            warn!("Warning: excessive comm failures, limiting error reporting");
        }

        if self.failures > self.limit && self.failures % self.limit != 0 {
            debug!(failures = self.failures, "Got to reconnect");
            return FailureReport::Reconnect;
        }

        match detail {
            Some(why) => warn!("Communications with UPS lost: {}", why),
            None => warn!("Communications with UPS lost - check cabling"),
        }
        FailureReport::Logged { throttle_notice }
    }
}
