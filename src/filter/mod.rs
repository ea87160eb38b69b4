/*!
The filter store holds every predicate the user declared before `start`
and answers the two match queries the pipeline asks: does a record pass
(project / collector / kind / time axes), and does an element pass
(peer, prefix, path, community axes).

An empty set on any axis means "no constraint on this axis". The store
only ever grows; filters cannot be removed.
*/
pub mod parser;

use crate::error::BgpStreamError;
use crate::models::{
    CommunityFilter, DumpType, ElemType, PatriciaTree, StreamElem, StreamRecord, BGPSTREAM_FOREVER,
};
use ipnet::IpNet;
use log::{debug, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// The filter axes accepted by [`FilterStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Project,
    Collector,
    RecordType,
    PeerAsn,
    /// Prefix filter. The `exact`/`more`/`less`/`any` spellings below
    /// are accepted DSL and CLI syntax for the same filter; element
    /// matching applies one containment rule to every stored prefix.
    Prefix,
    PrefixExact,
    PrefixMore,
    PrefixLess,
    PrefixAny,
    Community,
    /// Accepted by the DSL but not implemented; logged and ignored.
    ExtendedCommunity,
    AsPath,
    IpVersion,
    ElemType,
}

/// A `[begin, end]` time window; `end == BGPSTREAM_FOREVER` means live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub begin: u32,
    pub end: u32,
}

impl TimeInterval {
    pub fn is_live(&self) -> bool {
        self.end == BGPSTREAM_FOREVER
    }

    pub fn contains(&self, time: u32) -> bool {
        time >= self.begin && (self.is_live() || time <= self.end)
    }
}

#[derive(Default)]
pub struct FilterStore {
    projects: HashSet<String>,
    collectors: HashSet<String>,
    dump_types: HashSet<DumpType>,
    peer_asns: HashSet<u32>,
    prefixes: PatriciaTree,
    communities: Vec<CommunityFilter>,
    intervals: Vec<TimeInterval>,
    aspath_regexes: Vec<Regex>,
    ip_versions: HashSet<u8>,
    elem_types: HashSet<ElemType>,
    rib_period: u32,
    /// project.collector -> file time of the last admitted rib.
    last_rib_ts: HashMap<String, u32>,
}

impl FilterStore {
    pub fn new() -> FilterStore {
        FilterStore::default()
    }

    /// Appends one filter value to the given axis. Parse failures are
    /// configuration errors; axes the store does not implement are
    /// logged and ignored.
    pub fn add(&mut self, kind: FilterKind, value: &str) -> Result<(), BgpStreamError> {
        debug!("adding filter {:?} = {}", kind, value);
        match kind {
            FilterKind::Project => {
                self.projects.insert(value.to_string());
            }
            FilterKind::Collector => {
                self.collectors.insert(value.to_string());
            }
            FilterKind::RecordType => {
                let dump_type = DumpType::from_kind_str(value).ok_or_else(|| {
                    BgpStreamError::ConfigError(format!("invalid record type '{value}'"))
                })?;
                self.dump_types.insert(dump_type);
            }
            FilterKind::PeerAsn => {
                let asn = value.parse::<u32>().map_err(|_| {
                    BgpStreamError::ConfigError(format!("invalid peer ASN '{value}'"))
                })?;
                self.peer_asns.insert(asn);
            }
            FilterKind::Prefix
            | FilterKind::PrefixExact
            | FilterKind::PrefixMore
            | FilterKind::PrefixLess
            | FilterKind::PrefixAny => {
                self.add_prefix(value)?;
            }
            FilterKind::Community => {
                let filter = CommunityFilter::from_str(value)?;
                if !self.communities.contains(&filter) {
                    self.communities.push(filter);
                }
            }
            FilterKind::ExtendedCommunity => {
                warn!("extended community filters are not implemented, ignoring '{value}'");
            }
            FilterKind::AsPath => {
                let re = Regex::new(value).map_err(|e| {
                    BgpStreamError::ConfigError(format!("invalid AS path regex '{value}': {e}"))
                })?;
                if !self.aspath_regexes.iter().any(|r| r.as_str() == value) {
                    self.aspath_regexes.push(re);
                }
            }
            FilterKind::IpVersion => {
                let version = match value {
                    "4" | "ipv4" => 4,
                    "6" | "ipv6" => 6,
                    _ => {
                        return Err(BgpStreamError::ConfigError(format!(
                            "invalid IP version '{value}'"
                        )))
                    }
                };
                self.ip_versions.insert(version);
            }
            FilterKind::ElemType => {
                let elem_type = match value {
                    "rib" | "ribs" => ElemType::Rib,
                    "announce" | "announcement" | "announcements" => ElemType::Announce,
                    "withdraw" | "withdrawal" | "withdrawals" => ElemType::Withdraw,
                    "peerstate" | "peerstates" => ElemType::PeerState,
                    _ => {
                        return Err(BgpStreamError::ConfigError(format!(
                            "invalid element type '{value}'"
                        )))
                    }
                };
                self.elem_types.insert(elem_type);
            }
        }
        Ok(())
    }

    fn add_prefix(&mut self, value: &str) -> Result<(), BgpStreamError> {
        let net = IpNet::from_str(value)
            .map_err(|_| BgpStreamError::ConfigError(format!("invalid prefix '{value}'")))?;
        self.prefixes.insert(net);
        Ok(())
    }

    /// Appends a time window. `end == BGPSTREAM_FOREVER` declares live
    /// interest; the façade switches to blocking refreshes for it.
    pub fn add_interval(&mut self, begin: u32, end: u32) {
        let interval = TimeInterval { begin, end };
        if !self.intervals.contains(&interval) {
            self.intervals.push(interval);
        }
    }

    /// Sets the rib sampling period in seconds; 0 disables throttling.
    pub fn set_rib_period(&mut self, period: u32) {
        self.rib_period = period;
    }

    /// Checks the configured filters for consistency. Called by
    /// `start`; an interval that ends before it begins is the one
    /// configuration the store can reject early.
    pub fn validate(&self) -> Result<(), BgpStreamError> {
        for interval in &self.intervals {
            if !interval.is_live() && interval.begin > interval.end {
                return Err(BgpStreamError::ConfigError(format!(
                    "interval {},{} is invalid",
                    interval.begin, interval.end
                )));
            }
        }
        Ok(())
    }

    pub fn projects(&self) -> &HashSet<String> {
        &self.projects
    }

    pub fn collectors(&self) -> &HashSet<String> {
        &self.collectors
    }

    pub fn dump_types(&self) -> &HashSet<DumpType> {
        &self.dump_types
    }

    pub fn intervals(&self) -> &[TimeInterval] {
        &self.intervals
    }

    pub fn rib_period(&self) -> u32 {
        self.rib_period
    }

    /// True if any configured interval never ends.
    pub fn has_live_interval(&self) -> bool {
        self.intervals.iter().any(|i| i.is_live())
    }

    /// Is the timestamp inside any configured interval? No intervals
    /// means no time constraint.
    pub fn time_passes(&self, time: u32) -> bool {
        self.intervals.is_empty() || self.intervals.iter().any(|i| i.contains(time))
    }

    /// Record-level match: project, collector, dump kind and time
    /// window. Every configured axis must either be empty or contain
    /// the record. The façade applies this to every valid record it
    /// is about to emit.
    pub fn record_passes(&self, record: &StreamRecord) -> bool {
        if !self.projects.is_empty() && !self.projects.contains(&record.attributes.project) {
            return false;
        }
        if !self.collectors.is_empty() && !self.collectors.contains(&record.attributes.collector) {
            return false;
        }
        if !self.dump_types.is_empty() {
            match record.attributes.dump_type {
                Some(t) if self.dump_types.contains(&t) => {}
                _ => return false,
            }
        }
        self.time_passes(record.attributes.record_time)
    }

    /// Element-level match, evaluated in an order that reflects the
    /// information each element kind actually carries: peer checks
    /// first, then acceptance of peer-state elements (they have no
    /// prefix), then prefix containment, then acceptance of withdrawals
    /// (they carry no path or communities), then path and community
    /// checks. The element-kind and IP-version axes gate up front.
    pub fn element_passes(&self, elem: &StreamElem) -> bool {
        if !self.elem_types.is_empty() && !self.elem_types.contains(&elem.elem_type) {
            return false;
        }
        if !self.peer_asns.is_empty() && !self.peer_asns.contains(&u32::from(elem.peer_asn)) {
            return false;
        }
        if elem.elem_type == ElemType::PeerState {
            return true;
        }
        if !self.ip_versions.is_empty() {
            let version = if elem.is_ipv4() { 4 } else { 6 };
            if !self.ip_versions.contains(&version) {
                return false;
            }
        }
        if !self.prefixes.is_empty() {
            match &elem.prefix {
                Some(prefix) if self.prefixes.matches_filter(prefix) => {}
                _ => return false,
            }
        }
        if elem.elem_type == ElemType::Withdraw {
            return true;
        }
        if !self.aspath_regexes.is_empty() {
            let path = match &elem.as_path {
                Some(p) => p.to_string(),
                None => return false,
            };
            if !self.aspath_regexes.iter().any(|re| re.is_match(&path)) {
                return false;
            }
        }
        if !self.communities.is_empty() && !self.communities.iter().any(|c| elem.matches_community(c))
        {
            return false;
        }
        true
    }

    /// Rib-period admission test, one rib per period per
    /// (project, collector). Returns true when the input should be
    /// turned into a reader. A period of 0 admits everything.
    pub(crate) fn rib_period_check(
        &mut self,
        project: &str,
        collector: &str,
        dump_type: DumpType,
        file_time: u32,
    ) -> bool {
        if self.rib_period == 0 || dump_type != DumpType::Rib {
            return true;
        }
        let key = format!("{project}.{collector}");
        match self.last_rib_ts.get_mut(&key) {
            None => {
                self.last_rib_ts.insert(key, file_time);
                true
            }
            Some(last) => {
                if file_time == *last {
                    return true;
                }
                if file_time < last.saturating_add(self.rib_period) {
                    return false;
                }
                *last = file_time;
                true
            }
        }
    }

    /// Forgets the last admitted rib for a collector. Called when a
    /// corrupted source/record is exported so the next good rib is not
    /// silently skipped by the period check.
    pub(crate) fn rib_period_reset(&mut self, project: &str, collector: &str) {
        if self.rib_period == 0 {
            return;
        }
        let key = format!("{project}.{collector}");
        self.last_rib_ts.insert(key, 0);
    }

    // counts used by the parser tests and the CLI option listing
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    pub fn dump_type_count(&self) -> usize {
        self.dump_types.len()
    }

    pub fn community_count(&self) -> usize {
        self.communities.len()
    }

    pub fn prefix_tree(&self) -> &PatriciaTree {
        &self.prefixes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;
    use bgpkit_parser::models::{Asn, AsPath, Community, MetaCommunity};
    use std::net::IpAddr;

    fn announce(peer_asn: u32, prefix: &str) -> StreamElem {
        StreamElem {
            elem_type: ElemType::Announce,
            peer_ip: IpAddr::from([192, 0, 2, 1]),
            peer_asn: Asn::new_32bit(peer_asn),
            prefix: Some(prefix.parse().unwrap()),
            as_path: Some(AsPath::from_sequence([peer_asn, 2914, 37105])),
            communities: Some(vec![MetaCommunity::Plain(Community::Custom(
                Asn::new_32bit(2914),
                470,
            ))]),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_store_passes_everything() {
        let store = FilterStore::new();
        assert!(store.element_passes(&announce(25152, "154.73.128.0/17")));
        let mut record = StreamRecord::new();
        record.attributes.project = "ris".to_string();
        record.status = Some(RecordStatus::ValidRecord);
        assert!(store.record_passes(&record));
    }

    #[test]
    fn test_record_axes() {
        let mut store = FilterStore::new();
        store.add(FilterKind::Project, "ris").unwrap();
        store.add(FilterKind::Collector, "rrc06").unwrap();
        store.add(FilterKind::RecordType, "updates").unwrap();
        store.add_interval(100, 200);

        let mut record = StreamRecord::new();
        record.attributes.project = "ris".to_string();
        record.attributes.collector = "rrc06".to_string();
        record.attributes.dump_type = Some(DumpType::Update);
        record.attributes.record_time = 150;
        assert!(store.record_passes(&record));

        record.attributes.collector = "rrc00".to_string();
        assert!(!store.record_passes(&record));
        record.attributes.collector = "rrc06".to_string();
        record.attributes.record_time = 250;
        assert!(!store.record_passes(&record));
        record.attributes.record_time = 150;
        record.attributes.dump_type = Some(DumpType::Rib);
        assert!(!store.record_passes(&record));
    }

    #[test]
    fn test_peer_asn_gate() {
        let mut store = FilterStore::new();
        store.add(FilterKind::PeerAsn, "25152").unwrap();
        assert!(store.element_passes(&announce(25152, "154.73.128.0/17")));
        assert!(!store.element_passes(&announce(3333, "154.73.128.0/17")));
    }

    #[test]
    fn test_peer_state_short_circuit() {
        let mut store = FilterStore::new();
        store.add(FilterKind::Prefix, "10.0.0.0/8").unwrap();
        store.add(FilterKind::Community, "99:99").unwrap();
        // a peer-state element has no prefix and no communities, but
        // must pass because those axes do not apply to it
        let elem = StreamElem {
            elem_type: ElemType::PeerState,
            peer_asn: Asn::new_32bit(25152),
            ..Default::default()
        };
        assert!(store.element_passes(&elem));
    }

    #[test]
    fn test_prefix_containment_gate() {
        let mut store = FilterStore::new();
        store.add(FilterKind::Prefix, "154.73.128.0/17").unwrap();
        // exact hit and prefixes covered by the stored one pass;
        // prefixes covering it (or unrelated to it) are rejected
        assert!(store.element_passes(&announce(1, "154.73.128.0/17")));
        assert!(store.element_passes(&announce(1, "154.73.129.0/24")));
        assert!(!store.element_passes(&announce(1, "154.73.0.0/16")));
        assert!(!store.element_passes(&announce(1, "10.0.0.0/8")));
    }

    #[test]
    fn test_withdraw_skips_community_check() {
        let mut store = FilterStore::new();
        store.add(FilterKind::Prefix, "154.73.128.0/17").unwrap();
        store.add(FilterKind::Community, "99:99").unwrap();
        let withdraw = StreamElem {
            elem_type: ElemType::Withdraw,
            peer_asn: Asn::new_32bit(1),
            prefix: Some("154.73.128.0/17".parse().unwrap()),
            ..Default::default()
        };
        assert!(store.element_passes(&withdraw));
        // the same prefix as an announcement fails the community gate
        let mut ann = announce(1, "154.73.128.0/17");
        assert!(!store.element_passes(&ann));
        ann.communities = Some(vec![MetaCommunity::Plain(Community::Custom(
            Asn::new_32bit(99),
            99,
        ))]);
        assert!(store.element_passes(&ann));
    }

    #[test]
    fn test_community_wildcards() {
        let mut store = FilterStore::new();
        store.add(FilterKind::Community, "2914:*").unwrap();
        store.add(FilterKind::Community, "*:300").unwrap();
        assert!(store.element_passes(&announce(1, "10.0.0.0/8")));
        let mut elem = announce(1, "10.0.0.0/8");
        elem.communities = Some(vec![MetaCommunity::Plain(Community::Custom(
            Asn::new_32bit(64512),
            300,
        ))]);
        assert!(store.element_passes(&elem));
        elem.communities = Some(vec![MetaCommunity::Plain(Community::Custom(
            Asn::new_32bit(64512),
            301,
        ))]);
        assert!(!store.element_passes(&elem));
    }

    #[test]
    fn test_aspath_regex() {
        // the regexes run over the space-joined path string
        let mut elem = announce(1, "10.0.0.0/8");
        elem.as_path = Some(AsPath::from_sequence([1, 2914, 37105]));

        let mut store = FilterStore::new();
        store.add(FilterKind::AsPath, "2914").unwrap();
        assert!(store.element_passes(&elem));
        store.add(FilterKind::AsPath, "^1 ").unwrap();
        assert!(store.element_passes(&elem));

        let mut store = FilterStore::new();
        store.add(FilterKind::AsPath, "^2914").unwrap();
        assert!(!store.element_passes(&elem));
    }

    #[test]
    fn test_ip_version_and_elem_type() {
        let mut store = FilterStore::new();
        store.add(FilterKind::IpVersion, "4").unwrap();
        store.add(FilterKind::ElemType, "announcements").unwrap();
        assert!(store.element_passes(&announce(1, "10.0.0.0/8")));
        let mut v6 = announce(1, "10.0.0.0/8");
        v6.prefix = Some("2001:db8::/32".parse().unwrap());
        assert!(!store.element_passes(&v6));
        let mut withdraw = announce(1, "10.0.0.0/8");
        withdraw.elem_type = ElemType::Withdraw;
        assert!(!store.element_passes(&withdraw));
    }

    #[test]
    fn test_validate_intervals() {
        let mut store = FilterStore::new();
        store.add_interval(100, 200);
        assert!(store.validate().is_ok());
        store.add_interval(300, BGPSTREAM_FOREVER);
        assert!(store.validate().is_ok());
        assert!(store.has_live_interval());
        store.add_interval(500, 400);
        assert!(store.validate().is_err());
    }

    #[test]
    fn test_rib_period() {
        let mut store = FilterStore::new();
        store.set_rib_period(3600);
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Rib, 1000));
        // 1800 s later: same collector throttled, updates unaffected
        assert!(!store.rib_period_check("ris", "rrc06", DumpType::Rib, 2800));
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Update, 2800));
        // other collectors keep their own window
        assert!(store.rib_period_check("ris", "rrc00", DumpType::Rib, 2800));
        // re-offering the admitted file time is not throttled
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Rib, 1000));
        // one full period later
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Rib, 4600));
    }

    #[test]
    fn test_rib_period_zero_disables() {
        let mut store = FilterStore::new();
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Rib, 1000));
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Rib, 1001));
    }

    #[test]
    fn test_rib_period_reset() {
        let mut store = FilterStore::new();
        store.set_rib_period(3600);
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Rib, 1000));
        assert!(!store.rib_period_check("ris", "rrc06", DumpType::Rib, 2800));
        store.rib_period_reset("ris", "rrc06");
        assert!(store.rib_period_check("ris", "rrc06", DumpType::Rib, 2800));
    }

    #[test]
    fn test_unimplemented_axis_is_ignored() {
        let mut store = FilterStore::new();
        assert!(store.add(FilterKind::ExtendedCommunity, "ro:2914:100").is_ok());
    }
}
