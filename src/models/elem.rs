use bgpkit_parser::models::{Asn, AsPath, BgpState, Community, MetaCommunity, Origin};
use ipnet::IpNet;
use itertools::Itertools;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

use crate::models::DumpType;

/// The kind of routing element expanded from an MRT record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    /// One RIB table entry.
    Rib,
    /// An announced/reachable prefix.
    Announce,
    /// A withdrawn/unreachable prefix.
    Withdraw,
    /// A BGP session state transition.
    PeerState,
}

impl Display for ElemType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ElemType::Rib => write!(f, "R"),
            ElemType::Announce => write!(f, "A"),
            ElemType::Withdraw => write!(f, "W"),
            ElemType::PeerState => write!(f, "S"),
        }
    }
}

/// BGP finite-state-machine states carried by peer-state elements.
///
/// `Clearing` and `Deleted` come from the bgpdump vocabulary; collectors
/// emit them even though RFC 4271 stops at `Established`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
    Clearing,
    Deleted,
}

impl PeerState {
    pub(crate) fn from_bgp_state(state: BgpState) -> PeerState {
        match state {
            BgpState::Idle => PeerState::Idle,
            BgpState::Connect => PeerState::Connect,
            BgpState::Active => PeerState::Active,
            BgpState::OpenSent => PeerState::OpenSent,
            BgpState::OpenConfirm => PeerState::OpenConfirm,
            BgpState::Established => PeerState::Established,
        }
    }
}

impl Display for PeerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerState::Idle => "IDLE",
            PeerState::Connect => "CONNECT",
            PeerState::Active => "ACTIVE",
            PeerState::OpenSent => "OPENSENT",
            PeerState::OpenConfirm => "OPENCONFIRM",
            PeerState::Established => "ESTABLISHED",
            PeerState::Clearing => "CLEARING",
            PeerState::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

/// Result slot filled by a pluggable RPKI annotator (see
/// [`ElemAnnotator`](crate::stream::ElemAnnotator)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpkiValidation {
    NotValidated,
    Valid,
    Invalid,
    NotFound,
}

/// One per-prefix (or per-session) unit expanded from an MRT record.
///
/// Field applicability by kind: rib/announce carry prefix, next hop,
/// AS path and communities; withdraw carries only the prefix;
/// peer-state carries the old/new session states. Inapplicable fields
/// stay `None` and render as empty pipe segments.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamElem {
    pub elem_type: ElemType,
    pub timestamp: f64,
    pub peer_ip: IpAddr,
    pub peer_asn: Asn,
    pub prefix: Option<IpNet>,
    pub next_hop: Option<IpAddr>,
    pub as_path: Option<AsPath>,
    pub origin_asns: Option<Vec<Asn>>,
    pub communities: Option<Vec<MetaCommunity>>,
    pub old_state: Option<PeerState>,
    pub new_state: Option<PeerState>,
    // attribute extras carried for the bgpdump-compatible output
    pub origin: Option<Origin>,
    pub local_pref: Option<u32>,
    pub med: Option<u32>,
    pub atomic: bool,
    pub aggr_asn: Option<Asn>,
    pub aggr_ip: Option<IpAddr>,
    pub rpki: Option<RpkiValidation>,
}

impl Default for StreamElem {
    fn default() -> Self {
        StreamElem {
            elem_type: ElemType::Announce,
            timestamp: 0.0,
            peer_ip: IpAddr::from([0, 0, 0, 0]),
            peer_asn: Asn::new_32bit(0),
            prefix: None,
            next_hop: None,
            as_path: None,
            origin_asns: None,
            communities: None,
            old_state: None,
            new_state: None,
            origin: None,
            local_pref: None,
            med: None,
            atomic: false,
            aggr_asn: None,
            aggr_ip: None,
            rpki: None,
        }
    }
}

impl StreamElem {
    /// Origin ASN rendered the way the AS-path origin segment reads:
    /// a lone ASN for a sequence tail, `{a,b}` for a set.
    fn origin_str(&self) -> String {
        match &self.origin_asns {
            None => String::new(),
            Some(asns) if asns.is_empty() => String::new(),
            Some(asns) if asns.len() == 1 => asns[0].to_string(),
            Some(asns) => format!("{{{}}}", asns.iter().join(",")),
        }
    }

    fn communities_str(&self) -> String {
        match &self.communities {
            None => String::new(),
            Some(cs) => cs.iter().join(" "),
        }
    }

    /// The element's fields after the type column:
    /// `peer_asn|peer_ip|prefix|next_hop|as_path|origin_asn|communities|old_state|new_state`.
    ///
    /// Inapplicable segments are left empty so every line has the same
    /// column count regardless of element kind.
    pub fn format_fields(&self) -> String {
        let mut out = format!("{}|{}|", self.peer_asn, self.peer_ip);
        match self.elem_type {
            ElemType::Rib | ElemType::Announce => {
                out.push_str(&format!(
                    "{}|{}|{}|{}|{}||",
                    OptionToStr(&self.prefix),
                    OptionToStr(&self.next_hop),
                    OptionToStr(&self.as_path),
                    self.origin_str(),
                    self.communities_str(),
                ));
            }
            ElemType::Withdraw => {
                out.push_str(&format!("{}||||||", OptionToStr(&self.prefix)));
            }
            ElemType::PeerState => {
                out.push_str(&format!(
                    "|||||{}|{}",
                    OptionToStr(&self.old_state),
                    OptionToStr(&self.new_state),
                ));
            }
        }
        out
    }

    /// A bgpdump `-m` style line for this element.
    ///
    /// `BGP4MP|ts|A|peer_ip|peer_asn|prefix|as_path|origin|next_hop|local_pref|med|communities|atomic|aggregator|`
    /// with `TABLE_DUMP2` / `B` used for rib entries.
    pub fn to_bgpdump_line(&self, dump_type: DumpType) -> String {
        let (source, kind) = match (dump_type, self.elem_type) {
            (DumpType::Rib, _) => ("TABLE_DUMP2", "B"),
            (_, ElemType::Withdraw) => ("BGP4MP", "W"),
            (_, ElemType::PeerState) => ("BGP4MP", "STATE"),
            (_, _) => ("BGP4MP", "A"),
        };
        if self.elem_type == ElemType::Withdraw {
            return format!(
                "{}|{}|{}|{}|{}|{}",
                source,
                self.timestamp as i64,
                kind,
                self.peer_ip,
                self.peer_asn,
                OptionToStr(&self.prefix)
            );
        }
        if self.elem_type == ElemType::PeerState {
            return format!(
                "{}|{}|{}|{}|{}|{}|{}",
                source,
                self.timestamp as i64,
                kind,
                self.peer_ip,
                self.peer_asn,
                OptionToStr(&self.old_state),
                OptionToStr(&self.new_state)
            );
        }
        let aggregator = match (&self.aggr_asn, &self.aggr_ip) {
            (Some(asn), Some(ip)) => format!("{asn} {ip}"),
            _ => String::new(),
        };
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|",
            source,
            self.timestamp as i64,
            kind,
            self.peer_ip,
            self.peer_asn,
            OptionToStr(&self.prefix),
            OptionToStr(&self.as_path),
            OptionToStr(&self.origin),
            OptionToStr(&self.next_hop),
            self.local_pref.unwrap_or(0),
            self.med.unwrap_or(0),
            self.communities_str(),
            if self.atomic { "AG" } else { "NAG" },
            aggregator,
        )
    }

    /// True if this element's prefix (if any) is IPv4.
    pub fn is_ipv4(&self) -> bool {
        matches!(self.prefix, Some(IpNet::V4(_)))
    }

    /// True if this element's prefix (if any) is IPv6.
    pub fn is_ipv6(&self) -> bool {
        matches!(self.prefix, Some(IpNet::V6(_)))
    }

    /// Does any community on this element match the filter's
    /// `(asn, value)` pair (with `*` wildcards)?
    pub fn matches_community(&self, filter: &crate::models::CommunityFilter) -> bool {
        match &self.communities {
            None => false,
            Some(cs) => cs.iter().any(|c| filter.matches(c)),
        }
    }
}

/// Canonical element line: the type column followed by
/// [`format_fields`](StreamElem::format_fields).
impl Display for StreamElem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.elem_type, self.format_fields())
    }
}

pub(crate) fn well_known_community_pair(community: &Community) -> Option<(u32, u16)> {
    match community {
        Community::NoExport => Some((65535, 65281)),
        Community::NoAdvertise => Some((65535, 65282)),
        Community::NoExportSubConfed => Some((65535, 65283)),
        Community::Custom(asn, value) => Some((u32::from(*asn), *value)),
    }
}

struct OptionToStr<'a, T>(&'a Option<T>);

impl<T: Display> Display for OptionToStr<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            None => Ok(()),
            Some(x) => write!(f, "{x}"),
        }
    }
}
