// src/config.rs

use crate::health::{ERR_LIMIT, ERR_RATE};
use crate::reassembly::REPLY_TIMEOUT;
use crate::selector::SelectorConfig;
use crate::transaction::{MAX_ATTEMPTS, WRITE_SETTLE};
use std::time::Duration;

/// Maximum number of attempts when (re-)opening the device.
pub const OPEN_ATTEMPTS: usize = 5;
/// Wait after resetting a unit whose IN endpoint would not clear.
pub const REOPEN_SETTLE: Duration = Duration::from_secs(5);

/// Driver settings. Defaults match the protocol's fixed values.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub selector: SelectorConfig,
    pub open_attempts: usize,
    pub reopen_settle: Duration,
    pub reply_timeout: Duration,
    pub max_attempts: usize,
    pub write_settle: Duration,
    pub error_limit: u32,
    pub error_rate: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            selector: SelectorConfig::default(),
            open_attempts: OPEN_ATTEMPTS,
            reopen_settle: REOPEN_SETTLE,
            reply_timeout: REPLY_TIMEOUT,
            max_attempts: MAX_ATTEMPTS,
            write_settle: WRITE_SETTLE,
            error_limit: ERR_LIMIT,
            error_rate: ERR_RATE,
        }
    }
}

impl DriverConfig {
    pub fn with_selector(mut self, selector: SelectorConfig) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_write_settle(mut self, settle: Duration) -> Self {
        self.write_settle = settle;
        self
    }

    pub fn with_reopen_settle(mut self, settle: Duration) -> Self {
        self.reopen_settle = settle;
        self
    }
}
