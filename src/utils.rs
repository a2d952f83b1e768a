use lettre::message::Mailbox;
use time::macros::format_description;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

use crate::args::Args;
use crate::config::{ConfigError, RunConfiguration};
use crate::network::Cidr;

const LOG_LEVELS: [&str; 5] = ["error", "error", "warn", "info", "debug"];

/// Log level for `1 + verbose - quiet`, clamped to the level table.
pub fn log_level(verbose: u8, quiet: u8) -> &'static str {
    let selected = (1 + i32::from(verbose) - i32::from(quiet)).clamp(0, LOG_LEVELS.len() as i32 - 1);
    LOG_LEVELS[selected as usize]
}

pub fn setup_logging(verbose: u8, quiet: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(verbose, quiet)));
    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(timer)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn format_number(num: i64) -> String {
    let digits = num.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if num < 0 {
        grouped.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// Render an elapsed period in seconds as `<d> days HH:MM:SS`.
pub fn format_period(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|s| s.is_finite() && *s >= 0.0) else {
        return String::new();
    };
    let total = seconds.round() as u64;
    let (days, rest) = (total / 86_400, total % 86_400);
    let clock = format!("{:02}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day {}", clock),
        n => format!("{} days {}", n, clock),
    }
}

/// Events per hour over a period; blank when the period is empty.
pub fn hourly_rate(count: i64, period_seconds: Option<f64>) -> String {
    match period_seconds {
        Some(secs) if secs > 0.0 => format!("{:.2}", 3600.0 * count as f64 / secs),
        _ => String::new(),
    }
}

pub fn validate_args(args: &Args) -> Result<RunConfiguration, ConfigError> {
    let local_networks = args
        .local_networks
        .iter()
        .map(|net| {
            net.parse::<Cidr>()
                .map_err(|e| ConfigError::InvalidLocalNetwork {
                    network: net.clone(),
                    reason: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for address in &args.email {
        address
            .parse::<Mailbox>()
            .map_err(|e| ConfigError::InvalidRecipient {
                address: address.clone(),
                reason: e.to_string(),
            })?;
    }

    let config = RunConfiguration {
        is_dry_run: !args.production_run,
        should_maintain: !args.skip_maint,
        should_report: !args.skip_reports,
        purge_day_count: args.purge_day_count,
        top_n: args.top_n,
        success_ratio_threshold: args.success_ratio_threshold,
        recipients: args.email.clone(),
        local_networks,
    };
    config.validate()?;
    Ok(config)
}
