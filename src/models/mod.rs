/*!
Primitive types shared across the pipeline: records, elements, community
filters and the prefix Patricia tree.

Addresses, prefixes, AS paths and decoded communities reuse the standard
library and decoder types (`IpAddr`, `ipnet::IpNet`,
`bgpkit_parser::models::{Asn, AsPath, MetaCommunity}`); this module adds
the BGPStream-side vocabulary on top of them.
*/
pub mod community;
pub mod elem;
pub mod patricia;
pub mod record;

pub use community::CommunityFilter;
pub use elem::{ElemType, PeerState, RpkiValidation, StreamElem};
pub use patricia::{PatriciaTree, PrefixOverlap};
pub use record::{DumpPosition, DumpType, RecordAttributes, RecordStatus, StreamRecord};

/// Sentinel "end of time" used by interval filters to mean live mode.
pub const BGPSTREAM_FOREVER: u32 = u32::MAX;
