/*!
The element generator: expands one MRT record into its routing
elements.

Expansion is lazy; nothing is parsed until the first element is asked
for. A rib record becomes one element per (peer, prefix, path) table
entry, an update record one announce per announced prefix and one
withdraw per withdrawn prefix, and a BGP4MP state change one peer-state
element. Attribute unpacking is delegated to the decoder's `Elementor`;
peer-state elements and the rib/announce distinction are layered on
here because the decoder does not model them.
*/
use crate::models::{DumpType, ElemType, PeerState, StreamElem};
use bgpkit_parser::models::{
    Bgp4MpEnum, BgpElem, ElemType as DecodedElemType, MrtMessage, MrtRecord,
};
use bgpkit_parser::Elementor;
use std::net::IpAddr;

/// Lazy, clearable element sequence attached to a record.
#[derive(Default)]
pub(crate) struct ElemGenerator {
    elems: Option<Vec<StreamElem>>,
    cursor: usize,
}

impl ElemGenerator {
    /// Forgets everything; the next `populate` starts over.
    pub(crate) fn clear(&mut self) {
        self.elems = None;
        self.cursor = 0;
    }

    pub(crate) fn is_populated(&self) -> bool {
        self.elems.is_some()
    }

    #[cfg(test)]
    pub(crate) fn populate_for_tests(&mut self, elems: Vec<StreamElem>) {
        self.elems = Some(elems);
        self.cursor = 0;
    }

    /// Parses the record's payload into a flat element sequence. For
    /// TableDumpV2 rib records the dump's peer index table is replayed
    /// first so table entries resolve their peers.
    pub(crate) fn populate(
        &mut self,
        payload: &MrtRecord,
        peer_index: Option<&MrtRecord>,
        dump_type: DumpType,
    ) {
        let timestamp = record_timestamp(payload);
        let mut elems = Vec::new();

        if let MrtMessage::Bgp4Mp(Bgp4MpEnum::StateChange(change)) = &payload.message {
            elems.push(StreamElem {
                elem_type: ElemType::PeerState,
                timestamp,
                peer_ip: change.peer_ip,
                peer_asn: change.peer_asn,
                old_state: Some(PeerState::from_bgp_state(change.old_state)),
                new_state: Some(PeerState::from_bgp_state(change.new_state)),
                ..Default::default()
            });
        } else {
            let mut elementor = Elementor::new();
            if let Some(table) = peer_index {
                let _ = elementor.record_to_elems(table.clone());
            }
            elems.extend(
                elementor
                    .record_to_elems(payload.clone())
                    .into_iter()
                    .map(|elem| convert_elem(elem, dump_type)),
            );
        }

        self.elems = Some(elems);
        self.cursor = 0;
    }

    /// Yields the next element accepted by `accept`, which may also
    /// annotate the element in place before deciding.
    pub(crate) fn next_matching<F>(&mut self, mut accept: F) -> Option<&StreamElem>
    where
        F: FnMut(&mut StreamElem) -> bool,
    {
        loop {
            let index = self.cursor;
            {
                let elems = self.elems.as_mut()?;
                if index >= elems.len() {
                    return None;
                }
                self.cursor += 1;
                if !accept(&mut elems[index]) {
                    continue;
                }
            }
            return self.elems.as_deref().and_then(|elems| elems.get(index));
        }
    }
}

fn record_timestamp(record: &MrtRecord) -> f64 {
    let seconds = record.common_header.timestamp as f64;
    match record.common_header.microsecond_timestamp {
        Some(micro) => seconds + micro as f64 / 1_000_000.0,
        None => seconds,
    }
}

fn convert_elem(elem: BgpElem, dump_type: DumpType) -> StreamElem {
    // table entries are rib elements regardless of how the decoder
    // labels them; updates keep the announce/withdraw split
    let elem_type = match (dump_type, &elem.elem_type) {
        (DumpType::Rib, _) => ElemType::Rib,
        (DumpType::Update, DecodedElemType::ANNOUNCE) => ElemType::Announce,
        (DumpType::Update, DecodedElemType::WITHDRAW) => ElemType::Withdraw,
    };
    StreamElem {
        elem_type,
        timestamp: elem.timestamp,
        peer_ip: elem.peer_ip,
        peer_asn: elem.peer_asn,
        prefix: Some(elem.prefix.prefix),
        next_hop: elem.next_hop,
        as_path: elem.as_path,
        origin_asns: elem.origin_asns,
        communities: elem.communities,
        old_state: None,
        new_state: None,
        origin: elem.origin,
        local_pref: elem.local_pref,
        med: elem.med,
        atomic: elem.atomic,
        aggr_asn: elem.aggr_asn,
        aggr_ip: elem.aggr_ip.map(IpAddr::V4),
        rpki: None,
    }
}
