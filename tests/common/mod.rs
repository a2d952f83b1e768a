use anyhow::Result;
use assert_cmd::Command;
use iptrack_maint::directory::DirectoryService;
use iptrack_maint::enrichment::{EnrichmentCache, EnrichmentRecord, OrgLookup};
use iptrack_maint::network::default_local_networks;
use iptrack_maint::sqlite;
use rusqlite::{params, Connection};
use std::cell::Cell;
use std::net::IpAddr;
use std::path::Path;
use std::rc::Rc;

/// In-memory session with the event log schema and local network function.
pub fn session() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory database");
    sqlite::create_schema(&conn).expect("create schema");
    sqlite::register_functions(&conn, &default_local_networks()).expect("register functions");
    conn
}

/// A database file at `path` with the event log schema.
pub fn database_file(path: &Path) -> Connection {
    let conn = Connection::open(path).expect("create database file");
    sqlite::create_schema(&conn).expect("create schema");
    conn
}

/// Insert `count` events of one kind, one second apart, ending `days_ago` days back.
pub fn insert_events(conn: &Connection, src: &str, uid: i64, event: &str, count: i64, days_ago: i64) {
    conn.execute(
        "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < ?4)
         INSERT INTO inet_log (src_ipaddr, log_event, uid, log_date)
         SELECT ?1, ?2, ?3, datetime('now', ?5, '-' || i || ' seconds') FROM n",
        params![src, event, uid, count, format!("-{} day", days_ago)],
    )
    .expect("insert events");
}

pub fn block(conn: &Connection, entity: &str) {
    conn.execute("INSERT INTO block_now (ip_entity) VALUES (?1)", [entity])
        .expect("insert block");
}

pub fn event_count(conn: &Connection) -> i64 {
    sqlite::count_events(conn).expect("count events")
}

/// Resolves every address to the same documentation network, except the
/// ones listed as failing. Counts calls.
pub struct FakeLookup {
    pub calls: Rc<Cell<usize>>,
    pub failing: Vec<IpAddr>,
}

impl OrgLookup for FakeLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Option<EnrichmentRecord>> {
        self.calls.set(self.calls.get() + 1);
        if self.failing.contains(&ip) {
            anyhow::bail!("RDAP server returned 503");
        }
        Ok(Some(EnrichmentRecord {
            cidr: "203.0.113.0/24".into(),
            country_code: "US".into(),
            description: "EXAMPLE-NET".into(),
        }))
    }
}

pub fn cache(failing: &[&str]) -> (EnrichmentCache, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let lookup = FakeLookup {
        calls: Rc::clone(&calls),
        failing: failing.iter().map(|s| s.parse().expect("ip")).collect(),
    };
    (EnrichmentCache::new(Box::new(lookup)), calls)
}

pub struct FixedDirectory(pub Vec<i64>);

impl DirectoryService for FixedDirectory {
    fn account_ids(&self) -> Result<Vec<i64>> {
        Ok(self.0.clone())
    }
}

pub struct BrokenDirectory;

impl DirectoryService for BrokenDirectory {
    fn account_ids(&self) -> Result<Vec<i64>> {
        anyhow::bail!("ldapsearch exited with exit status: 255: Can't contact LDAP server (-1)")
    }
}

pub fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("iptrack-maint").expect("binary built");
    cmd.env_remove("RUST_LOG")
        .env_remove("IPTRACKING_DB")
        .env_remove("IPTRACKING_LDAP_URI")
        .env_remove("IPTRACKING_LDAP_BASE")
        .env_remove("IPTRACKING_RDAP_URL")
        .env_remove("IPTRACKING_SMTP_HOST");
    cmd
}
