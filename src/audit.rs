use anyhow::Result;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::RunConfiguration;
use crate::directory::{DirectoryService, LdapSearch};
use crate::enrichment::{EnrichmentCache, NoLookup, OrgLookup, RdapLookup};
use crate::report::MessageBody;
use crate::sqlite;
use crate::tasks::{RunContext, Task, TaskRunner};
use crate::Args;

/// External collaborators a run talks to besides the database.
pub struct Collaborators {
    pub lookup: Box<dyn OrgLookup>,
    pub directory: Option<Box<dyn DirectoryService>>,
}

impl Collaborators {
    pub fn from_args(args: &Args) -> Result<Self> {
        let lookup: Box<dyn OrgLookup> = if args.no_lookup {
            Box::new(NoLookup)
        } else {
            Box::new(RdapLookup::new(&args.rdap_url)?)
        };
        let directory = args.ldap_base.as_ref().map(|base| {
            Box::new(LdapSearch {
                uri: args.ldap_uri.clone(),
                base: base.clone(),
                filter: args.ldap_filter.clone(),
            }) as Box<dyn DirectoryService>
        });
        Ok(Collaborators { lookup, directory })
    }
}

/// Run every enabled task against the database at `args.database`.
///
/// Only a failure to establish the session is returned as an error; task
/// failures end up as sections of the returned body.
pub fn run_audit(args: &Args, config: &RunConfiguration, collaborators: Collaborators) -> Result<MessageBody> {
    let total_start_time = Instant::now();
    let mut body = MessageBody::new(config);

    let conn = sqlite::open_session(&args.database, &config.local_networks)?;

    let mut ctx = RunContext::new(config, EnrichmentCache::new(collaborators.lookup));
    let runner = TaskRunner::new(&conn);
    runner.load_reference_uids(collaborators.directory.as_deref(), &mut ctx, &mut body);
    runner.run(&Task::SEQUENCE, &mut ctx, &mut body);

    info!(
        action = "summary",
        component = "enrichment_cache",
        cached_addresses = ctx.cache.len(),
        country_count = ctx.cache.countries().len(),
        "Enrichment cache summary"
    );

    debug!(action = "close", component = "database_session", "Closing database connection");
    drop(ctx);
    drop(conn);

    info!(
        action = "complete",
        component = "audit",
        section_count = body.sections().len(),
        duration_ms = total_start_time.elapsed().as_millis(),
        "Maintenance and reporting run completed"
    );
    Ok(body)
}
