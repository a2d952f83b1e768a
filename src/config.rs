use thiserror::Error;

use crate::network::{self, Cidr};

pub const DEFAULT_PURGE_DAY_COUNT: u32 = 10;
pub const DEFAULT_TOP_N: usize = 20;
pub const DEFAULT_SUCCESS_RATIO_THRESHOLD: f64 = 0.05;
pub const MIN_TOP_N: usize = 5;

/// Exit status for configuration errors (`EINVAL`).
pub const EXIT_INVALID_CONFIG: u8 = 22;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No work to be done.")]
    NoWork,
    #[error("Top N result limit must be at least 5: {0}")]
    TopNTooSmall(usize),
    #[error("Success ratio threshold must be in range (0,1]: {0}")]
    SuccessRatioOutOfRange(f64),
    #[error("Purge day count must be greater than 0")]
    PurgeDayCountZero,
    #[error("Invalid local network '{network}': {reason}")]
    InvalidLocalNetwork { network: String, reason: String },
    #[error("Invalid email address '{address}': {reason}")]
    InvalidRecipient { address: String, reason: String },
}

/// Everything a task needs to know about this invocation. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub is_dry_run: bool,
    pub should_maintain: bool,
    pub should_report: bool,
    pub purge_day_count: u32,
    pub top_n: usize,
    pub success_ratio_threshold: f64,
    pub recipients: Vec<String>,
    pub local_networks: Vec<Cidr>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        RunConfiguration {
            is_dry_run: true,
            should_maintain: true,
            should_report: true,
            purge_day_count: DEFAULT_PURGE_DAY_COUNT,
            top_n: DEFAULT_TOP_N,
            success_ratio_threshold: DEFAULT_SUCCESS_RATIO_THRESHOLD,
            recipients: Vec::new(),
            local_networks: network::default_local_networks(),
        }
    }
}

impl RunConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.should_maintain || self.should_report) {
            return Err(ConfigError::NoWork);
        }
        if self.top_n < MIN_TOP_N {
            return Err(ConfigError::TopNTooSmall(self.top_n));
        }
        let ratio = self.success_ratio_threshold;
        if !(ratio > f64::EPSILON) || (ratio - 1.0) > f64::EPSILON {
            return Err(ConfigError::SuccessRatioOutOfRange(ratio));
        }
        if self.purge_day_count == 0 {
            return Err(ConfigError::PurgeDayCountZero);
        }
        Ok(())
    }

    pub fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }
}
