use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::network;

pub const DEFAULT_RDAP_URL: &str = "https://rdap.org/ip/";

/// Organizational metadata for the network an address belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentRecord {
    pub cidr: String,
    pub country_code: String,
    pub description: String,
}

/// An external source of network ownership data.
///
/// `Ok(None)` and `Err(_)` are treated the same by the cache: no information.
pub trait OrgLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Option<EnrichmentRecord>>;
}

/// Used when lookups are disabled; every address is unknown.
pub struct NoLookup;

impl OrgLookup for NoLookup {
    fn lookup(&self, _ip: IpAddr) -> Result<Option<EnrichmentRecord>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapNetwork {
    handle: Option<String>,
    name: Option<String>,
    country: Option<String>,
    start_address: Option<String>,
    end_address: Option<String>,
    #[serde(rename = "cidr0_cidrs", default)]
    cidr0_cidrs: Vec<RdapCidr>,
}

#[derive(Debug, Deserialize)]
struct RdapCidr {
    v4prefix: Option<String>,
    v6prefix: Option<String>,
    length: Option<u8>,
}

impl RdapNetwork {
    fn into_record(self) -> Result<EnrichmentRecord> {
        let description = self
            .name
            .or(self.handle)
            .context("RDAP response carried no network name or handle")?;

        let mut blocks: Vec<String> = self
            .cidr0_cidrs
            .iter()
            .filter_map(|c| {
                let prefix = c.v4prefix.as_ref().or(c.v6prefix.as_ref())?;
                Some(format!("{}/{}", prefix, c.length?))
            })
            .collect();
        if blocks.is_empty() {
            if let (Some(start), Some(end)) = (self.start_address, self.end_address) {
                blocks.push(format!("{} - {}", start, end));
            }
        }

        Ok(EnrichmentRecord {
            cidr: blocks.join(", "),
            country_code: self.country.unwrap_or_default(),
            description,
        })
    }
}

pub fn parse_rdap_response(body: &str) -> Result<EnrichmentRecord> {
    let network: RdapNetwork =
        serde_json::from_str(body).context("Malformed RDAP response")?;
    network.into_record()
}

/// Blocking RDAP client. Requests carry no timeout, so a stalled server stalls the run.
pub struct RdapLookup {
    base_url: Url,
    client: reqwest::blocking::Client,
}

impl RdapLookup {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid RDAP URL '{}'", base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build RDAP client")?;
        Ok(RdapLookup { base_url, client })
    }

    fn url_for(&self, ip: IpAddr) -> Result<Url> {
        // Url::join would read "fe80::1" as a scheme.
        Url::parse(&format!("{}{}", self.base_url, ip)).context("Failed to build RDAP query URL")
    }
}

impl OrgLookup for RdapLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Option<EnrichmentRecord>> {
        let url = self.url_for(ip)?;
        let response = self
            .client
            .get(url)
            .header("Accept", "application/rdap+json")
            .send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.text()?;
        parse_rdap_response(&body).map(Some)
    }
}

/// Per-run memo of address ownership lookups.
///
/// Only successful lookups are remembered. A failed or empty lookup leaves no
/// entry behind, so asking about the same address again goes back out to the
/// lookup service.
pub struct EnrichmentCache {
    source: Box<dyn OrgLookup>,
    records: HashMap<IpAddr, EnrichmentRecord>,
    countries: BTreeSet<String>,
}

impl EnrichmentCache {
    pub fn new(source: Box<dyn OrgLookup>) -> Self {
        EnrichmentCache {
            source,
            records: HashMap::new(),
            countries: BTreeSet::new(),
        }
    }

    pub fn lookup(&mut self, ip: IpAddr) -> Option<EnrichmentRecord> {
        if let Some(record) = self.records.get(&ip) {
            return Some(record.clone());
        }
        match self.source.lookup(ip) {
            Ok(Some(record)) => {
                if !record.country_code.is_empty() {
                    self.countries.insert(record.country_code.clone());
                }
                self.records.insert(ip, record.clone());
                Some(record)
            }
            Ok(None) => {
                debug!(action = "lookup", component = "enrichment_cache", ip = %ip, "No organization data");
                None
            }
            Err(e) => {
                debug!(action = "lookup", component = "enrichment_cache", ip = %ip, error = %e, "Organization lookup failed");
                None
            }
        }
    }

    /// Annotation columns for a textual address: cidr, country, description.
    /// All empty when nothing is known.
    pub fn annotate(&mut self, addr: &str) -> [String; 3] {
        match network::parse_address(addr).and_then(|ip| self.lookup(ip)) {
            Some(record) => [record.cidr, record.country_code, record.description],
            None => Default::default(),
        }
    }

    pub fn countries(&self) -> &BTreeSet<String> {
        &self.countries
    }

    /// Number of cached addresses per country code seen this run.
    pub fn country_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            self.countries.iter().map(|cc| (cc.clone(), 0)).collect();
        for record in self.records.values() {
            if let Some(count) = counts.get_mut(&record.country_code) {
                *count += 1;
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Scripted {
        calls: Rc<RefCell<Vec<IpAddr>>>,
        failing: Vec<IpAddr>,
    }

    impl OrgLookup for Scripted {
        fn lookup(&self, ip: IpAddr) -> Result<Option<EnrichmentRecord>> {
            self.calls.borrow_mut().push(ip);
            if self.failing.contains(&ip) {
                anyhow::bail!("connection reset");
            }
            Ok(Some(EnrichmentRecord {
                cidr: format!("{}/24", ip),
                country_code: if ip.is_ipv4() { "US".into() } else { "DE".into() },
                description: "EXAMPLE-NET".into(),
            }))
        }
    }

    fn cache(failing: &[&str]) -> (EnrichmentCache, Rc<RefCell<Vec<IpAddr>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let source = Scripted {
            calls: Rc::clone(&calls),
            failing: failing.iter().map(|s| s.parse().unwrap()).collect(),
        };
        (EnrichmentCache::new(Box::new(source)), calls)
    }

    #[test]
    fn repeated_lookup_hits_source_once() {
        let (mut cache, calls) = cache(&[]);
        let ip: IpAddr = "198.51.100.7".parse().unwrap();
        let first = cache.lookup(ip).unwrap();
        let second = cache.lookup(ip).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let (mut cache, calls) = cache(&["203.0.113.5"]);
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        assert!(cache.lookup(ip).is_none());
        assert!(cache.lookup(ip).is_none());
        assert_eq!(calls.borrow().len(), 2);
        assert!(cache.is_empty());
        assert!(cache.countries().is_empty());
    }

    #[test]
    fn annotate_handles_blocks_and_garbage() {
        let (mut cache, calls) = cache(&["203.0.113.5"]);
        let [cidr, country, descr] = cache.annotate("198.51.100.7/32");
        assert_eq!(cidr, "198.51.100.7/24");
        assert_eq!(country, "US");
        assert_eq!(descr, "EXAMPLE-NET");

        assert_eq!(cache.annotate("203.0.113.5"), <[String; 3]>::default());
        assert_eq!(cache.annotate("nonsense"), <[String; 3]>::default());
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn countries_accumulate() {
        let (mut cache, _) = cache(&[]);
        cache.lookup("198.51.100.7".parse().unwrap());
        cache.lookup("198.51.100.8".parse().unwrap());
        cache.lookup("2001:db8::1".parse().unwrap());
        let seen: Vec<&str> = cache.countries().iter().map(String::as_str).collect();
        assert_eq!(seen, ["DE", "US"]);
        let counts = cache.country_counts();
        assert_eq!(counts["US"], 2);
        assert_eq!(counts["DE"], 1);
    }

    #[test]
    fn rdap_response_with_cidr0() {
        let body = r#"{
            "objectClassName": "ip network",
            "handle": "NET-198-51-100-0-1",
            "startAddress": "198.51.100.0",
            "endAddress": "198.51.100.255",
            "name": "EXAMPLE-NET",
            "country": "US",
            "cidr0_cidrs": [{"v4prefix": "198.51.100.0", "length": 24}]
        }"#;
        let record = parse_rdap_response(body).unwrap();
        assert_eq!(record.cidr, "198.51.100.0/24");
        assert_eq!(record.country_code, "US");
        assert_eq!(record.description, "EXAMPLE-NET");
    }

    #[test]
    fn rdap_response_falls_back_to_range_and_handle() {
        let body = r#"{"handle": "EXAMPLE-6", "startAddress": "2001:db8::", "endAddress": "2001:db8::ffff"}"#;
        let record = parse_rdap_response(body).unwrap();
        assert_eq!(record.cidr, "2001:db8:: - 2001:db8::ffff");
        assert_eq!(record.country_code, "");
        assert_eq!(record.description, "EXAMPLE-6");
    }

    #[test]
    fn rdap_response_without_identity_is_an_error() {
        assert!(parse_rdap_response(r#"{"country": "US"}"#).is_err());
        assert!(parse_rdap_response("<html>rate limited</html>").is_err());
    }

    #[test]
    fn rdap_base_url_gets_trailing_slash() {
        let lookup = RdapLookup::new("https://rdap.example.net/ip").unwrap();
        assert_eq!(
            lookup.url_for("192.0.2.1".parse().unwrap()).unwrap().as_str(),
            "https://rdap.example.net/ip/192.0.2.1"
        );
        assert_eq!(
            lookup.url_for("fe80::1".parse().unwrap()).unwrap().as_str(),
            "https://rdap.example.net/ip/fe80::1"
        );
        assert!(RdapLookup::new("not a url").is_err());
    }
}
