/*!
A Patricia (path-compressed binary radix) tree over IP prefixes.

The tree indexes the filter store's prefixes and answers overlap
queries: does a probed prefix have an exact entry, a covering
(less-specific) entry, or covered (more-specific) entries? The element
filter applies one fixed rule over those flags, regardless of how a
prefix was declared: a prefix matches when it is stored exactly or when
a stored prefix covers it.
*/
use bitflags::bitflags;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

bitflags! {
    /// How a probed prefix relates to the prefixes stored in the tree.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrefixOverlap: u8 {
        /// The probed prefix itself is stored.
        const EXACT_MATCH = 0b001;
        /// A stored prefix covers the probed one.
        const LESS_SPECIFICS = 0b010;
        /// The probed prefix covers at least one stored prefix.
        const MORE_SPECIFICS = 0b100;
    }
}

struct Node {
    prefix: IpNet,
    /// False marks a glue node created by a branch split, which holds
    /// no user prefix.
    stored: bool,
    children: [Option<Box<Node>>; 2],
}

impl Node {
    fn new(prefix: IpNet, stored: bool) -> Box<Node> {
        Box::new(Node {
            prefix,
            stored,
            children: [None, None],
        })
    }
}

/// Prefixes are mapped to `(bits, len)` with the address bits
/// left-aligned in a u128 so both families share the walk logic.
fn net_bits(net: &IpNet) -> u128 {
    match net {
        IpNet::V4(n) => (u32::from(n.network()) as u128) << 96,
        IpNet::V6(n) => u128::from(n.network()),
    }
}

fn net_len(net: &IpNet) -> u8 {
    net.prefix_len()
}

fn bit_at(bits: u128, index: u8) -> usize {
    ((bits >> (127 - index as u32)) & 1) as usize
}

/// Length of the longest common prefix of two bit strings, capped at
/// both prefix lengths.
fn common_len(a_bits: u128, a_len: u8, b_bits: u128, b_len: u8) -> u8 {
    let differ = (a_bits ^ b_bits).leading_zeros().min(128) as u8;
    differ.min(a_len).min(b_len)
}

fn truncate(net: &IpNet, len: u8) -> IpNet {
    let bits = net_bits(net);
    match net {
        IpNet::V4(_) => {
            let addr = std::net::Ipv4Addr::from(((bits >> 96) as u32) & mask_v4(len));
            IpNet::V4(Ipv4Net::new_assert(addr, len))
        }
        IpNet::V6(_) => {
            let addr = std::net::Ipv6Addr::from(bits & mask_v6(len));
            IpNet::V6(Ipv6Net::new_assert(addr, len))
        }
    }
}

fn mask_v4(len: u8) -> u32 {
    match len {
        0 => 0,
        n => u32::MAX << (32 - n as u32),
    }
}

fn mask_v6(len: u8) -> u128 {
    match len {
        0 => 0,
        n => u128::MAX << (128 - n as u32),
    }
}

/// A Patricia tree holding one trie per address family.
#[derive(Default)]
pub struct PatriciaTree {
    v4: Option<Box<Node>>,
    v6: Option<Box<Node>>,
    v4_count: usize,
    v6_count: usize,
}

impl PatriciaTree {
    pub fn new() -> PatriciaTree {
        PatriciaTree::default()
    }

    pub fn is_empty(&self) -> bool {
        self.v4_count == 0 && self.v6_count == 0
    }

    /// Number of stored IPv4 prefixes.
    pub fn ipv4_count(&self) -> usize {
        self.v4_count
    }

    /// Number of stored IPv6 prefixes.
    pub fn ipv6_count(&self) -> usize {
        self.v6_count
    }

    /// Inserts a prefix; re-inserting an existing prefix is a no-op.
    pub fn insert(&mut self, prefix: IpNet) {
        let prefix = prefix.trunc();
        let (slot, count) = match prefix {
            IpNet::V4(_) => (&mut self.v4, &mut self.v4_count),
            IpNet::V6(_) => (&mut self.v6, &mut self.v6_count),
        };
        if insert_node(slot, prefix) {
            *count += 1;
        }
    }

    /// Is this exact prefix stored?
    pub fn search_exact(&self, prefix: &IpNet) -> bool {
        self.overlap_info(prefix).contains(PrefixOverlap::EXACT_MATCH)
    }

    /// How does `prefix` relate to the stored prefixes?
    pub fn overlap_info(&self, prefix: &IpNet) -> PrefixOverlap {
        let root = match prefix {
            IpNet::V4(_) => &self.v4,
            IpNet::V6(_) => &self.v6,
        };
        let prefix = prefix.trunc();
        let p_bits = net_bits(&prefix);
        let p_len = net_len(&prefix);

        let mut flags = PrefixOverlap::empty();

        let mut cursor = root;
        while let Some(node) = cursor {
            let n_bits = net_bits(&node.prefix);
            let n_len = net_len(&node.prefix);
            let cl = common_len(n_bits, n_len, p_bits, p_len);
            if cl < n_len.min(p_len) {
                // diverged before either prefix ended
                break;
            }
            if n_len == p_len && cl == n_len {
                if node.stored {
                    flags |= PrefixOverlap::EXACT_MATCH;
                }
                if subtree_holds_prefix(&node.children) {
                    flags |= PrefixOverlap::MORE_SPECIFICS;
                }
                break;
            }
            if n_len < p_len && cl == n_len {
                // node covers the probe, keep descending
                if node.stored {
                    flags |= PrefixOverlap::LESS_SPECIFICS;
                }
                cursor = &node.children[bit_at(p_bits, n_len)];
                continue;
            }
            // probe covers the node: everything below is more specific
            if node.stored || subtree_holds_prefix(&node.children) {
                flags |= PrefixOverlap::MORE_SPECIFICS;
            }
            break;
        }
        flags
    }

    /// The containment query the element filter asks: accept on an
    /// exact hit or on a stored prefix covering `prefix`. The rule is
    /// the same for every stored prefix; a probe that merely covers
    /// stored prefixes is a miss.
    pub fn matches_filter(&self, prefix: &IpNet) -> bool {
        self.overlap_info(prefix)
            .intersects(PrefixOverlap::EXACT_MATCH | PrefixOverlap::LESS_SPECIFICS)
    }

    /// The topmost stored prefixes: the minimal set covering everything
    /// in the tree.
    pub fn minimum_coverage(&self) -> Vec<IpNet> {
        let mut out = Vec::new();
        collect_topmost(&self.v4, &mut out);
        collect_topmost(&self.v6, &mut out);
        out
    }

    /// Number of /24 blocks covered by the stored IPv4 prefixes.
    /// Prefixes longer than /24 count their (single) enclosing block.
    pub fn count_24_subnets(&self) -> u64 {
        count_subnets(&self.v4, 24)
    }

    /// Number of /64 blocks covered by the stored IPv6 prefixes.
    pub fn count_64_subnets(&self) -> u64 {
        count_subnets(&self.v6, 64)
    }
}

fn insert_node(slot: &mut Option<Box<Node>>, prefix: IpNet) -> bool {
    let mut node = match slot.take() {
        None => {
            *slot = Some(Node::new(prefix, true));
            return true;
        }
        Some(node) => node,
    };

    let n_bits = net_bits(&node.prefix);
    let n_len = net_len(&node.prefix);
    let p_bits = net_bits(&prefix);
    let p_len = net_len(&prefix);
    let cl = common_len(n_bits, n_len, p_bits, p_len);

    if cl == n_len && cl == p_len {
        // same prefix: promote a glue node, or a duplicate insert
        let newly_stored = !node.stored;
        node.stored = true;
        *slot = Some(node);
        newly_stored
    } else if cl == n_len {
        // new prefix extends below this node
        let newly_stored = insert_node(&mut node.children[bit_at(p_bits, n_len)], prefix);
        *slot = Some(node);
        newly_stored
    } else if cl == p_len {
        // new prefix is an ancestor of this node
        let mut new_node = Node::new(prefix, true);
        new_node.children[bit_at(n_bits, p_len)] = Some(node);
        *slot = Some(new_node);
        true
    } else {
        // the prefixes diverge: split with a glue node at the fork
        let mut glue = Node::new(truncate(&prefix, cl), false);
        glue.children[bit_at(p_bits, cl)] = Some(Node::new(prefix, true));
        glue.children[bit_at(n_bits, cl)] = Some(node);
        *slot = Some(glue);
        true
    }
}

fn subtree_holds_prefix(children: &[Option<Box<Node>>; 2]) -> bool {
    children
        .iter()
        .flatten()
        .any(|child| child.stored || subtree_holds_prefix(&child.children))
}

fn collect_topmost(slot: &Option<Box<Node>>, out: &mut Vec<IpNet>) {
    if let Some(node) = slot {
        if node.stored {
            out.push(node.prefix);
        } else {
            collect_topmost(&node.children[0], out);
            collect_topmost(&node.children[1], out);
        }
    }
}

fn count_subnets(slot: &Option<Box<Node>>, block_len: u8) -> u64 {
    match slot {
        None => 0,
        Some(node) => {
            if node.stored {
                let len = net_len(&node.prefix);
                if len >= block_len {
                    1
                } else {
                    1u64.checked_shl((block_len - len) as u32).unwrap_or(u64::MAX)
                }
            } else {
                count_subnets(&node.children[0], block_len)
                    + count_subnets(&node.children[1], block_len)
            }
        }
    }
}
