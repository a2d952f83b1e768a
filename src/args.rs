use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{DEFAULT_PURGE_DAY_COUNT, DEFAULT_SUCCESS_RATIO_THRESHOLD, DEFAULT_TOP_N};
use crate::directory::DEFAULT_LDAP_FILTER;
use crate::enrichment::DEFAULT_RDAP_URL;
use crate::network::DEFAULT_LOCAL_NETWORKS;

#[derive(Parser, Debug)]
#[command(
    name = "iptrack-maint",
    about = "Perform iptracking database maintenance and reporting tasks",
    version,
    long_about = None
)]
pub struct Args {
    /// Increase verbosity
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Decrease verbosity
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Allow changes to the database
    #[arg(short = 'n', long)]
    pub production_run: bool,

    /// Do not perform maintenance tasks
    #[arg(short = 'm', long)]
    pub skip_maint: bool,

    /// Do not perform reporting tasks
    #[arg(short = 'r', long)]
    pub skip_reports: bool,

    /// Purge event records older than this many days
    #[arg(short = 'p', long, value_name = "N", default_value_t = DEFAULT_PURGE_DAY_COUNT)]
    pub purge_day_count: u32,

    /// Limit result lists to this many records
    #[arg(short = 'N', long = "top-N", value_name = "N", default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    /// IPs/UIDs with an open_session:auth ratio less than this value will be considered suspect
    #[arg(short = 's', long = "success-ratio-thresh", value_name = "N.", default_value_t = DEFAULT_SUCCESS_RATIO_THRESHOLD, allow_negative_numbers = true)]
    pub success_ratio_threshold: f64,

    /// Send output to one or more email addresses
    #[arg(short = 'e', long = "email", value_name = "email-address", action = ArgAction::Append)]
    pub email: Vec<String>,

    /// Path to the iptracking database
    #[arg(short = 'd', long, env = "IPTRACKING_DB", default_value = "/var/lib/iptracking/iptracking.db")]
    pub database: PathBuf,

    /// Network considered local; repeat for several (CIDR notation)
    #[arg(long = "local-net", value_name = "CIDR", action = ArgAction::Append, default_values = DEFAULT_LOCAL_NETWORKS.iter().copied())]
    pub local_networks: Vec<String>,

    /// LDAP server URI for the reference account list
    #[arg(long, env = "IPTRACKING_LDAP_URI")]
    pub ldap_uri: Option<String>,

    /// LDAP search base; the reference account list is only loaded when set
    #[arg(long, env = "IPTRACKING_LDAP_BASE")]
    pub ldap_base: Option<String>,

    /// LDAP filter selecting legitimate accounts
    #[arg(long, default_value = DEFAULT_LDAP_FILTER)]
    pub ldap_filter: String,

    /// RDAP service used to describe addresses
    #[arg(long, env = "IPTRACKING_RDAP_URL", default_value = DEFAULT_RDAP_URL)]
    pub rdap_url: String,

    /// Do not look up address ownership
    #[arg(long)]
    pub no_lookup: bool,

    /// Sender address for emailed reports
    #[arg(long, default_value = "root@localhost")]
    pub mail_from: String,

    /// SMTP relay for emailed reports
    #[arg(long, env = "IPTRACKING_SMTP_HOST", default_value = "localhost")]
    pub smtp_host: String,

    /// Tag prepended to the mail subject
    #[arg(long, default_value = "iptracking")]
    pub subject_tag: String,

    /// Create an empty iptracking database at --database and exit
    #[arg(long)]
    pub init_db: bool,
}
