use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

use iptrack_maint::config::EXIT_INVALID_CONFIG;
use iptrack_maint::mail::{self, MailSettings};
use iptrack_maint::{run_audit, sqlite, utils, Args, Collaborators};

fn main() -> ExitCode {
    let args = Args::parse();
    utils::setup_logging(args.verbose, args.quiet);

    if args.init_db {
        return match sqlite::init_database(&args.database) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match utils::validate_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let collaborators = match Collaborators::from_args(&args) {
        Ok(collaborators) => collaborators,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let body = match run_audit(&args, &config, collaborators) {
        Ok(body) => body,
        Err(e) => {
            error!("Unable to connect to database: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let settings = MailSettings {
        from: args.mail_from.clone(),
        smtp_host: args.smtp_host.clone(),
        subject_tag: args.subject_tag.clone(),
    };
    match mail::deliver(&body, &config, &settings) {
        Ok(delivery) => {
            info!(action = "deliver", component = "main", delivery = ?delivery, "Report delivery finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
