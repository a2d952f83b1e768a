use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::{params, Connection};
use std::process::Command;
use std::time::Instant;
use tracing::info;

pub const DEFAULT_LDAP_FILTER: &str = "(objectClass=posixAccount)";
pub const UID_ATTRIBUTE: &str = "uidNumber";

/// Source of the canonical set of legitimate account ids.
pub trait DirectoryService {
    fn account_ids(&self) -> Result<Vec<i64>>;
}

/// Queries an LDAP directory through the OpenLDAP `ldapsearch` client.
pub struct LdapSearch {
    pub uri: Option<String>,
    pub base: String,
    pub filter: String,
}

impl DirectoryService for LdapSearch {
    fn account_ids(&self) -> Result<Vec<i64>> {
        let mut cmd = Command::new("ldapsearch");
        cmd.args(["-x", "-LLL"]);
        if let Some(uri) = &self.uri {
            cmd.args(["-H", uri.as_str()]);
        }
        cmd.args(["-b", self.base.as_str(), self.filter.as_str(), UID_ATTRIBUTE]);

        let output = cmd.output().context("Failed to run ldapsearch")?;
        if !output.status.success() {
            anyhow::bail!(
                "ldapsearch exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_ldif_values(&String::from_utf8_lossy(&output.stdout), UID_ATTRIBUTE)
    }
}

/// Pull the integer values of `attribute` out of LDIF text.
pub fn parse_ldif_values(ldif: &str, attribute: &str) -> Result<Vec<i64>> {
    let pattern = Regex::new(&format!(r"(?mi)^{}:[ \t]*(\S+)[ \t]*$", regex::escape(attribute)))?;
    pattern
        .captures_iter(ldif)
        .map(|caps| {
            let value = &caps[1];
            value
                .parse::<i64>()
                .with_context(|| format!("Invalid {} value '{}'", attribute, value))
        })
        .collect()
}

/// Replace the session-scoped `temp.reference_uids` table with the directory's account ids.
pub fn load_reference_uids(conn: &Connection, directory: &dyn DirectoryService) -> Result<usize> {
    let start_time = Instant::now();
    info!(action = "start", component = "reference_uids", "Loading reference user ids from directory");

    let uids = directory.account_ids()?;

    conn.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS reference_uids (uid INTEGER PRIMARY KEY);
         DELETE FROM temp.reference_uids;",
    )
    .context("Failed to prepare reference_uids table")?;

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO temp.reference_uids (uid) VALUES (?1)")?;
        for uid in &uids {
            stmt.execute(params![uid])?;
        }
    }
    tx.commit().context("Failed to store reference user ids")?;

    let loaded: i64 = conn.query_row("SELECT COUNT(*) FROM temp.reference_uids", [], |row| row.get(0))?;
    info!(
        action = "complete",
        component = "reference_uids",
        uid_count = loaded,
        duration_ms = start_time.elapsed().as_millis(),
        "Reference user ids loaded"
    );
    Ok(loaded as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<i64>);

    impl DirectoryService for Fixed {
        fn account_ids(&self) -> Result<Vec<i64>> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    impl DirectoryService for Unreachable {
        fn account_ids(&self) -> Result<Vec<i64>> {
            anyhow::bail!("Can't contact LDAP server (-1)")
        }
    }

    #[test]
    fn ldif_values() {
        let ldif = "dn: uid=alice,ou=People,dc=example,dc=edu\nuidNumber: 1001\n\n\
                    dn: uid=bob,ou=People,dc=example,dc=edu\nuidnumber: 1002\n\n\
                    dn: uid=nobody,ou=People,dc=example,dc=edu\n";
        assert_eq!(parse_ldif_values(ldif, UID_ATTRIBUTE).unwrap(), vec![1001, 1002]);
        assert!(parse_ldif_values("uidNumber: abc\n", UID_ATTRIBUTE).is_err());
        assert!(parse_ldif_values("", UID_ATTRIBUTE).unwrap().is_empty());
    }

    #[test]
    fn loads_and_replaces_reference_set() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(load_reference_uids(&conn, &Fixed(vec![1001, 1002, 1002])).unwrap(), 2);
        assert_eq!(load_reference_uids(&conn, &Fixed(vec![2001])).unwrap(), 1);
        let uid: i64 = conn
            .query_row("SELECT uid FROM temp.reference_uids", [], |row| row.get(0))
            .unwrap();
        assert_eq!(uid, 2001);
    }

    #[test]
    fn directory_failure_leaves_no_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(load_reference_uids(&conn, &Unreachable).is_err());
        assert!(conn
            .query_row("SELECT COUNT(*) FROM temp.reference_uids", [], |row| row.get::<_, i64>(0))
            .is_err());
    }
}
