use crate::error::BgpStreamError;
use bgpkit_parser::models::MetaCommunity;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use super::elem::well_known_community_pair;

/// A community filter: an `(asn, value)` pair where either half may be
/// the `*` wildcard. `2914:*` matches every community set by AS2914,
/// `*:300` matches value 300 from any AS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommunityFilter {
    pub asn: Option<u32>,
    pub value: Option<u16>,
}

impl CommunityFilter {
    /// Does the given decoded community match this filter?
    ///
    /// Only plain communities participate: the three well-known
    /// reserved communities match through their registered
    /// `65535:x` pairs, extended and large communities never match.
    pub fn matches(&self, community: &MetaCommunity) -> bool {
        let pair = match community {
            MetaCommunity::Plain(c) => well_known_community_pair(c),
            _ => None,
        };
        match pair {
            None => false,
            Some((asn, value)) => {
                self.asn.is_none_or(|a| a == asn) && self.value.is_none_or(|v| v == value)
            }
        }
    }
}

impl FromStr for CommunityFilter {
    type Err = BgpStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || BgpStreamError::ConfigError(format!("invalid community filter '{s}'"));
        let (asn_str, value_str) = s.split_once(':').ok_or_else(err)?;
        let asn = match asn_str {
            "*" => None,
            _ => Some(asn_str.parse::<u32>().map_err(|_| err())?),
        };
        let value = match value_str {
            "*" => None,
            _ => Some(value_str.parse::<u16>().map_err(|_| err())?),
        };
        Ok(CommunityFilter { asn, value })
    }
}

impl Display for CommunityFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.asn {
            Some(asn) => write!(f, "{asn}:")?,
            None => write!(f, "*:")?,
        }
        match self.value {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgpkit_parser::models::{Asn, Community};

    fn plain(asn: u32, value: u16) -> MetaCommunity {
        MetaCommunity::Plain(Community::Custom(Asn::new_32bit(asn), value))
    }

    #[test]
    fn test_parse() {
        let f = CommunityFilter::from_str("2914:470").unwrap();
        assert_eq!(f.asn, Some(2914));
        assert_eq!(f.value, Some(470));

        let f = CommunityFilter::from_str("2914:*").unwrap();
        assert_eq!(f.asn, Some(2914));
        assert_eq!(f.value, None);

        let f = CommunityFilter::from_str("*:300").unwrap();
        assert_eq!(f.asn, None);
        assert_eq!(f.value, Some(300));

        assert!(CommunityFilter::from_str("nonsense").is_err());
        assert!(CommunityFilter::from_str("1:2:3").is_err());
        assert!(CommunityFilter::from_str("a:*").is_err());
    }

    #[test]
    fn test_wildcard_matching() {
        let exact = CommunityFilter::from_str("2914:470").unwrap();
        let any_value = CommunityFilter::from_str("2914:*").unwrap();
        let any_asn = CommunityFilter::from_str("*:300").unwrap();

        assert!(exact.matches(&plain(2914, 470)));
        assert!(!exact.matches(&plain(2914, 471)));
        assert!(any_value.matches(&plain(2914, 12345)));
        assert!(!any_value.matches(&plain(2915, 12345)));
        assert!(any_asn.matches(&plain(64512, 300)));
        assert!(!any_asn.matches(&plain(64512, 301)));
    }

    #[test]
    fn test_well_known_matching() {
        let f = CommunityFilter::from_str("65535:65281").unwrap();
        assert!(f.matches(&MetaCommunity::Plain(Community::NoExport)));
        assert!(!f.matches(&MetaCommunity::Plain(Community::NoAdvertise)));
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["2914:470", "2914:*", "*:300", "*:*"] {
            assert_eq!(CommunityFilter::from_str(s).unwrap().to_string(), s);
        }
    }
}
