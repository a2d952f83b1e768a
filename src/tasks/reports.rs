use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

use super::{section, RunContext, NO_MATCHING_DATA};
use crate::sqlite;
use crate::table::{Align, TextTable};
use crate::utils::{format_number, format_period, hourly_rate};

/// Addresses and uids need more events than this to show up in the volume reports.
pub const MIN_EVENT_COUNT: i64 = 2500;

const ORG_HEADERS: [&str; 3] = ["org cidr", "org country", "org descrip"];

type SubReport = fn(&Connection, &mut RunContext<'_>) -> Result<Vec<String>>;

/// Heading, subject for error lines, whether it reads `inet_log`, and the report.
const TOP_COUNT_REPORTS: &[(&str, &str, bool, SubReport)] = &[
    ("## Top IPs by event count", "top IPs by event count", true, top_ips_by_event_count),
    ("## Top UIDs by event count", "top uids by event count", true, top_uids_by_event_count),
    ("## Top IPs by session success rate", "top IPs by session success rate", true, top_ips_by_success_ratio),
    ("## Top UIDs by session success rate", "top uids by session success rate", true, top_uids_by_success_ratio),
    (
        "## Top (possibly) open sessions from foreign IPs",
        "top (possibly) open sessions from foreign IPs",
        true,
        open_foreign_sessions,
    ),
    (
        "## Foreign IPs used by directory accounts",
        "foreign IPs used by directory accounts",
        true,
        foreign_ips_by_reference_uid,
    ),
    ("## Active firewall blocks", "active firewall blocks", false, firewall_blocks),
    ("## Countries of origin", "countries of origin", false, country_summary),
];

fn with_org_headers(headers: &[&str]) -> Vec<String> {
    headers
        .iter()
        .chain(ORG_HEADERS.iter())
        .map(|h| h.to_string())
        .collect()
}

fn align_org(table: TextTable) -> TextTable {
    table
        .align("org cidr", Align::Right)
        .align("org country", Align::Center)
        .align("org descrip", Align::Left)
}

/// Seconds between the first and last event of a group.
const PERIOD_SQL: &str = "(julianday(MAX(log_date)) - julianday(MIN(log_date))) * 86400.0";

pub fn daily_event_count(conn: &Connection, _ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    if sqlite::count_events(conn)? == 0 {
        return Ok(Vec::new());
    }
    Ok(section(
        "## Daily event counts",
        "daily event counts",
        daily_event_table(conn),
    ))
}

fn daily_event_table(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT date(log_date) AS log_day, COUNT(*) AS event_count
           FROM inet_log
          GROUP BY log_day
          ORDER BY log_day ASC",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut table = TextTable::new(["log_day", "day_of_week", "event_count"])
        .align("log_day", Align::Left)
        .align("day_of_week", Align::Center)
        .align("event_count", Align::Right);
    for (day, count) in rows {
        let weekday = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
            .map(|d| d.format("%a").to_string())
            .unwrap_or_default();
        table.push_row(vec![day, weekday, format_number(count)]);
    }
    Ok(vec![table.render()])
}

/// Every volume, success-ratio, session, and block report, each isolated from
/// the others' failures. With an empty event log only the block snapshot and
/// country summary run, and nothing at all when no blocks are active either.
pub fn top_counts(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let has_events = sqlite::count_events(conn)? > 0;
    if !has_events && count_blocks(conn)? == 0 {
        return Ok(Vec::new());
    }
    let mut sections = Vec::new();
    for (heading, subject, reads_log, report) in TOP_COUNT_REPORTS {
        if *reads_log && !has_events {
            continue;
        }
        sections.extend(section(heading, subject, report(conn, &mut *ctx)));
    }
    Ok(sections)
}

fn count_blocks(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM block_now", [], |row| row.get(0))
        .context("Failed to count firewall blocks")
}

struct VolumeRow {
    key: String,
    event_count: i64,
    distinct: i64,
    period: Option<f64>,
}

pub fn top_ips_by_event_count(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT src_ipaddr, event_count, unique_uids, period FROM (
             SELECT src_ipaddr, COUNT(*) AS event_count, COUNT(DISTINCT uid) AS unique_uids,
                    {PERIOD_SQL} AS period
               FROM inet_log
              GROUP BY src_ipaddr)
          WHERE event_count > ?1
          ORDER BY event_count DESC, src_ipaddr ASC
          LIMIT ?2"
    );
    let rows = conn
        .prepare(&sql)?
        .query_map(params![MIN_EVENT_COUNT, ctx.config.top_n as i64], |row| {
            Ok(VolumeRow {
                key: row.get(0)?,
                event_count: row.get(1)?,
                distinct: row.get(2)?,
                period: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if rows.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }

    let mut table = align_org(
        TextTable::new(with_org_headers(&[
            "event_count",
            "src_ipaddr",
            "unique_uids",
            "period",
            "avg_per_hour",
        ]))
        .align("event_count", Align::Right)
        .align("src_ipaddr", Align::Left)
        .align("unique_uids", Align::Right)
        .align("period", Align::Right)
        .align("avg_per_hour", Align::Right),
    );
    for row in rows {
        let [cidr, country, descr] = ctx.cache.annotate(&row.key);
        table.push_row(vec![
            format_number(row.event_count),
            row.key,
            format_number(row.distinct),
            format_period(row.period),
            hourly_rate(row.event_count, row.period),
            cidr,
            country,
            descr,
        ]);
    }
    Ok(vec![table.render()])
}

pub fn top_uids_by_event_count(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT uid, event_count, unique_ips, period FROM (
             SELECT uid, COUNT(*) AS event_count, COUNT(DISTINCT src_ipaddr) AS unique_ips,
                    {PERIOD_SQL} AS period
               FROM inet_log
              GROUP BY uid)
          WHERE event_count > ?1
          ORDER BY event_count DESC, uid ASC
          LIMIT ?2"
    );
    let rows = conn
        .prepare(&sql)?
        .query_map(params![MIN_EVENT_COUNT, ctx.config.top_n as i64], |row| {
            Ok(VolumeRow {
                key: row.get::<_, i64>(0)?.to_string(),
                event_count: row.get(1)?,
                distinct: row.get(2)?,
                period: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if rows.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }

    let mut table = TextTable::new(["uid", "event_count", "unique_ips", "period", "avg_per_hour"])
        .align("uid", Align::Left)
        .align("event_count", Align::Right)
        .align("unique_ips", Align::Right)
        .align("period", Align::Right)
        .align("avg_per_hour", Align::Right);
    for row in rows {
        table.push_row(vec![
            row.key,
            format_number(row.event_count),
            format_number(row.distinct),
            format_period(row.period),
            hourly_rate(row.event_count, row.period),
        ]);
    }
    Ok(vec![table.render()])
}

struct RatioRow {
    success_ratio: f64,
    session_count: i64,
    auth_count: i64,
    key: String,
    distinct: i64,
    period: Option<f64>,
}

/// Groups whose sessions-opened to auth-attempts ratio falls below the threshold,
/// lowest ratio first. Groups missing either kind of event are left out.
fn low_success_ratios(
    conn: &Connection,
    ctx: &RunContext<'_>,
    key_column: &str,
    distinct_column: &str,
) -> Result<Vec<RatioRow>> {
    let sql = format!(
        "SELECT CAST(session_count AS REAL) / auth_count AS success_ratio,
                session_count, auth_count, CAST(group_key AS TEXT), distinct_count, period FROM (
             SELECT COUNT(CASE WHEN log_event = 'open_session' THEN 1 END) AS session_count,
                    COUNT(CASE WHEN log_event = 'auth' THEN 1 END) AS auth_count,
                    {key_column} AS group_key,
                    COUNT(DISTINCT {distinct_column}) AS distinct_count,
                    {PERIOD_SQL} AS period
               FROM inet_log
              GROUP BY {key_column})
          WHERE auth_count > 0 AND session_count > 0
            AND CAST(session_count AS REAL) / auth_count < ?1
          ORDER BY success_ratio ASC, group_key ASC
          LIMIT ?2"
    );
    let rows = conn
        .prepare(&sql)?
        .query_map(
            params![ctx.config.success_ratio_threshold, ctx.config.top_n as i64],
            |row| {
                Ok(RatioRow {
                    success_ratio: row.get(0)?,
                    session_count: row.get(1)?,
                    auth_count: row.get(2)?,
                    key: row.get(3)?,
                    distinct: row.get(4)?,
                    period: row.get(5)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("Failed to compute success ratios by {}", key_column))?;
    Ok(rows)
}

fn ratio_table(rows: &[RatioRow], key_header: &str, distinct_header: &str) -> String {
    let mut table = TextTable::new([
        "success_ratio",
        "session_count",
        "auth_count",
        key_header,
        distinct_header,
        "period",
    ])
    .align(key_header, Align::Left)
    .align("success_ratio", Align::Right)
    .align("session_count", Align::Right)
    .align("auth_count", Align::Right)
    .align(distinct_header, Align::Right)
    .align("period", Align::Right);
    for row in rows {
        table.push_row(vec![
            format!("{:.4}", row.success_ratio),
            format_number(row.session_count),
            format_number(row.auth_count),
            row.key.clone(),
            format_number(row.distinct),
            format_period(row.period),
        ]);
    }
    table.render()
}

fn bullet_list(intro: String, items: &[String]) -> String {
    let mut text = intro;
    for item in items {
        text.push_str("\n        - ");
        text.push_str(item);
    }
    text
}

pub fn top_ips_by_success_ratio(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let rows = low_success_ratios(conn, ctx, "src_ipaddr", "uid")?;
    if rows.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }
    let mut blocks = vec![ratio_table(&rows, "src_ipaddr", "unique_uids")];

    let mut stmt = conn.prepare(
        "SELECT DISTINCT uid FROM inet_log
          WHERE src_ipaddr = ?1 AND log_event = 'open_session'
          ORDER BY uid",
    )?;
    for row in &rows {
        let uids = stmt
            .query_map([&row.key], |r| r.get::<_, i64>(0))?
            .map(|uid| uid.map(|uid| uid.to_string()))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        blocks.push(bullet_list(
            format!("    - src_ipaddr \"{}\", sessions granted on uids:", row.key),
            &uids,
        ));
    }
    Ok(blocks)
}

pub fn top_uids_by_success_ratio(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let rows = low_success_ratios(conn, ctx, "uid", "src_ipaddr")?;
    if rows.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }
    let mut blocks = vec![ratio_table(&rows, "uid", "unique_ips")];

    let mut stmt = conn.prepare(
        "SELECT DISTINCT src_ipaddr FROM inet_log
          WHERE uid = CAST(?1 AS INTEGER) AND log_event = 'open_session'
          ORDER BY src_ipaddr",
    )?;
    for row in &rows {
        let addrs = stmt
            .query_map([&row.key], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        blocks.push(bullet_list(
            format!("    - uid \"{}\", sessions granted on IPs:", row.key),
            &addrs,
        ));
    }
    Ok(blocks)
}

pub fn open_foreign_sessions(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let rows = conn
        .prepare(
            "SELECT uid, src_ipaddr,
                    (open_count - close_count) AS live_sessions,
                    (auth_count + open_count + close_count) AS total_events FROM (
                 SELECT COUNT(CASE WHEN log_event = 'auth' THEN 1 END) AS auth_count,
                        COUNT(CASE WHEN log_event = 'open_session' THEN 1 END) AS open_count,
                        COUNT(CASE WHEN log_event = 'close_session' THEN 1 END) AS close_count,
                        src_ipaddr, uid
                   FROM inet_log
                  WHERE NOT is_local_ipaddr(src_ipaddr)
                  GROUP BY src_ipaddr, uid)
              WHERE (open_count - close_count) > 0
              ORDER BY live_sessions DESC, total_events DESC, uid ASC, src_ipaddr ASC
              LIMIT ?1",
        )?
        .query_map(params![ctx.config.top_n as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if rows.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }

    let mut table = align_org(
        TextTable::new(with_org_headers(&["uid", "src_ipaddr", "live_sessions", "total_events"]))
            .align("uid", Align::Left)
            .align("src_ipaddr", Align::Left)
            .align("live_sessions", Align::Right)
            .align("total_events", Align::Right),
    );
    for (uid, addr, live, total) in rows {
        let [cidr, country, descr] = ctx.cache.annotate(&addr);
        table.push_row(vec![
            uid.to_string(),
            addr,
            format_number(live),
            format_number(total),
            cidr,
            country,
            descr,
        ]);
    }
    Ok(vec![table.render()])
}

/// Directory accounts that opened sessions from outside the local networks,
/// ranked by unique addresses times foreign addresses. Each account's foreign
/// addresses are listed grouped by the organization they resolve to.
pub fn foreign_ips_by_reference_uid(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    if !ctx.reference_uids_loaded {
        return Ok(vec![
            "Reference user list unavailable; report skipped.".to_string()
        ]);
    }

    let rows = conn
        .prepare(
            "SELECT uid, unique_ips, foreign_ips, unique_ips * foreign_ips AS score FROM (
                 SELECT L.uid AS uid,
                        COUNT(DISTINCT L.src_ipaddr) AS unique_ips,
                        COUNT(DISTINCT CASE WHEN NOT is_local_ipaddr(L.src_ipaddr)
                                            THEN L.src_ipaddr END) AS foreign_ips
                   FROM inet_log AS L
                  INNER JOIN temp.reference_uids AS R ON (L.uid = R.uid)
                  WHERE L.log_event = 'open_session'
                  GROUP BY L.uid)
              WHERE foreign_ips > 0
              ORDER BY score DESC, uid ASC
              LIMIT ?1",
        )?
        .query_map(params![ctx.config.top_n as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if rows.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }

    let mut table = TextTable::new(["uid", "unique_ips", "foreign_ips", "score"])
        .align("uid", Align::Left)
        .align("unique_ips", Align::Right)
        .align("foreign_ips", Align::Right)
        .align("score", Align::Right);
    for (uid, unique, foreign, score) in &rows {
        table.push_row(vec![
            uid.to_string(),
            format_number(*unique),
            format_number(*foreign),
            format_number(*score),
        ]);
    }
    let mut blocks = vec![table.render()];

    let mut stmt = conn.prepare(
        "SELECT DISTINCT src_ipaddr FROM inet_log
          WHERE uid = ?1 AND log_event = 'open_session' AND NOT is_local_ipaddr(src_ipaddr)
          ORDER BY src_ipaddr",
    )?;
    for (uid, ..) in &rows {
        let addrs = stmt
            .query_map([uid], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_org: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for addr in addrs {
            let [_, country, descr] = ctx.cache.annotate(&addr);
            let org = match (descr.is_empty(), country.is_empty()) {
                (true, _) => "(unknown organization)".to_string(),
                (false, true) => descr,
                (false, false) => format!("{} ({})", descr, country),
            };
            by_org.entry(org).or_default().push(addr);
        }
        let groups: Vec<String> = by_org
            .into_iter()
            .map(|(org, addrs)| format!("{}: {}", org, addrs.join(", ")))
            .collect();
        blocks.push(bullet_list(
            format!("    - uid \"{}\", sessions opened from foreign IPs:", uid),
            &groups,
        ));
    }
    Ok(blocks)
}

pub fn firewall_blocks(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let entities = conn
        .prepare("SELECT ip_entity FROM block_now ORDER BY ip_entity")?
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if entities.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }

    let mut table = align_org(
        TextTable::new(with_org_headers(&["ip_entity"])).align("ip_entity", Align::Left),
    );
    for entity in entities {
        let [cidr, country, descr] = ctx.cache.annotate(&entity);
        table.push_row(vec![entity, cidr, country, descr]);
    }
    Ok(vec![table.render()])
}

/// Countries resolved by the enrichment cache so far this run.
pub fn country_summary(_conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let counts = ctx.cache.country_counts();
    if counts.is_empty() {
        return Ok(vec![NO_MATCHING_DATA.to_string()]);
    }
    let mut table = TextTable::new(["org country", "addresses"])
        .align("org country", Align::Center)
        .align("addresses", Align::Right);
    for (country, count) in counts {
        table.push_row(vec![country, format_number(count as i64)]);
    }
    Ok(vec![table.render()])
}
