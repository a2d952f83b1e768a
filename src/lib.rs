pub mod args;
pub mod audit;
pub mod config;
pub mod directory;
pub mod enrichment;
pub mod mail;
pub mod network;
pub mod report;
pub mod sqlite;
pub mod table;
pub mod tasks;
pub mod utils;

pub use args::Args;
pub use audit::{run_audit, Collaborators};
pub use config::{ConfigError, RunConfiguration};
pub use report::MessageBody;
