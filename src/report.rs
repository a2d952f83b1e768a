use chrono::Local;
use std::fmt;
use std::time::Duration;

use crate::config::RunConfiguration;

const RULE: &str = "    --------------------------------------------------------------------------------";

/// User and system CPU time consumed by this process so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuUsage {
    pub user: Duration,
    pub system: Duration,
}

impl CpuUsage {
    #[cfg(unix)]
    pub fn now() -> Self {
        use std::mem::MaybeUninit;

        let mut usage = MaybeUninit::<libc::rusage>::uninit();
        // Safety: getrusage only writes into the struct we hand it.
        let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
        if ret != 0 {
            return CpuUsage::default();
        }
        let usage = unsafe { usage.assume_init() };
        CpuUsage {
            user: timeval_to_duration(usage.ru_utime),
            system: timeval_to_duration(usage.ru_stime),
        }
    }

    #[cfg(not(unix))]
    pub fn now() -> Self {
        CpuUsage::default()
    }

    pub fn since(&self, start: &CpuUsage) -> CpuUsage {
        CpuUsage {
            user: self.user.saturating_sub(start.user),
            system: self.system.saturating_sub(start.system),
        }
    }
}

#[cfg(unix)]
fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

/// The report being built up over one run.
///
/// The header is fixed when the body is created; the footer is computed each
/// time the body is rendered.
pub struct MessageBody {
    start_usage: CpuUsage,
    official_timestamp: String,
    header: String,
    sections: Vec<String>,
}

impl MessageBody {
    pub fn new(config: &RunConfiguration) -> Self {
        let start_usage = CpuUsage::now();
        let official_timestamp = Local::now().format("%Y-%m-%d %H:%M").to_string();

        let mut settings = format!(
            "    - {}-run selected\n",
            if config.is_dry_run { "dry" } else { "production" }
        );
        if config.should_maintain {
            settings.push_str(&format!(
                "    - purge records older than {} day(s)\n",
                config.purge_day_count
            ));
        }
        if config.should_report {
            settings.push_str(&format!(
                "    - limit result lists to {} record(s)\n",
                config.top_n
            ));
            settings.push_str(&format!(
                "    - open_session:auth ratio < {} considered suspect\n",
                config.success_ratio_threshold
            ));
        }

        let header = [
            format!("\n# iptracking maintenance and reporting run, {}", official_timestamp),
            settings,
            "The following information was generated during the iptracking-maint run:".to_string(),
        ]
        .join("\n\n");

        MessageBody {
            start_usage,
            official_timestamp,
            header,
            sections: Vec::new(),
        }
    }

    pub fn append<I, S>(&mut self, sections: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections.extend(sections.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn official_timestamp(&self) -> &str {
        &self.official_timestamp
    }

    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    pub fn render(&self) -> String {
        let usage = CpuUsage::now().since(&self.start_usage);
        let user = usage.user.as_secs_f64();
        let system = usage.system.as_secs_f64();
        let footer = format!(
            "\n## Summary\n\n{RULE}\n      maintenance and reporting completed in {:.6} s\n      (user: {:.6} s | system: {:.6} s)\n{RULE}\n",
            user + system,
            user,
            system
        );
        format!(
            "{}\n\n{}\n\n{}",
            self.header,
            self.sections.join("\n\n"),
            footer
        )
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_echoes_configuration() {
        let config = RunConfiguration {
            is_dry_run: false,
            purge_day_count: 30,
            top_n: 7,
            ..Default::default()
        };
        let body = MessageBody::new(&config);
        let text = body.render();
        assert!(text.contains("# iptracking maintenance and reporting run, "));
        assert!(text.contains(body.official_timestamp()));
        assert!(text.contains("    - production-run selected"));
        assert!(text.contains("    - purge records older than 30 day(s)"));
        assert!(text.contains("    - limit result lists to 7 record(s)"));
        assert!(text.contains("    - open_session:auth ratio < 0.05 considered suspect"));
    }

    #[test]
    fn header_omits_disabled_work() {
        let config = RunConfiguration {
            should_report: false,
            ..Default::default()
        };
        let text = MessageBody::new(&config).render();
        assert!(text.contains("    - dry-run selected"));
        assert!(!text.contains("limit result lists"));
        assert!(!text.contains("considered suspect"));
    }

    #[test]
    fn sections_keep_order_and_footer_always_renders() {
        let mut body = MessageBody::new(&RunConfiguration::default());
        assert!(body.is_empty());
        assert!(body.render().contains("## Summary"));

        body.append(["## First", "alpha"]);
        body.append(vec![String::from("## Second")]);
        assert!(!body.is_empty());
        assert_eq!(body.sections().len(), 3);

        let text = body.to_string();
        let first = text.find("## First").unwrap();
        let alpha = text.find("alpha").unwrap();
        let second = text.find("## Second").unwrap();
        let summary = text.find("## Summary").unwrap();
        assert!(first < alpha && alpha < second && second < summary);
        assert!(text.contains("## First\n\nalpha\n\n## Second"));
        assert!(text.contains("maintenance and reporting completed in"));
    }

    #[test]
    fn timestamp_is_fixed_at_construction() {
        let body = MessageBody::new(&RunConfiguration::default());
        let stamp = body.official_timestamp().to_string();
        assert_eq!(stamp.len(), "2026-10-16 09:30".len());
        let _ = body.render();
        assert_eq!(body.official_timestamp(), stamp);
    }

    #[test]
    fn cpu_usage_difference_never_underflows() {
        let later = CpuUsage::now();
        let earlier = CpuUsage {
            user: later.user + Duration::from_secs(5),
            system: later.system,
        };
        let delta = later.since(&earlier);
        assert_eq!(delta.user, Duration::ZERO);
    }
}
