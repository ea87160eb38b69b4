/*!
BGPStream: a framework for ingesting, time-ordering, filtering and
emitting BGP routing records from MRT dump archives.

A stream is driven by four cooperating layers:

- a **catalogue** (the broker HTTP service, or a local singlefile /
  csvfile / sqlite manifest) discovers which dump files are relevant to
  the configured filters;
- the **input queue** keeps discovered files sorted by the time they
  cover, ribs ahead of updates, duplicates suppressed;
- a pool of **readers** opens many dumps concurrently (one background
  opener each) and merges their entries into a single stream with
  monotone record time;
- an **element generator** lazily expands each record into per-prefix
  elements (rib entries, announcements, withdrawals) and per-session
  peer-state transitions, gated by the element filters.

MRT byte-level decoding is delegated to [`bgpkit-parser`][parser] and
transport/decompression to [`oneio`]; this crate owns discovery,
ordering, filtering and the record/element vocabulary.

[parser]: https://crates.io/crates/bgpkit-parser

# Example

Stream every update covering a five-minute window from one RIS
collector and print the announcements of a prefix:

```no_run
use bgpstream::{BgpStream, FilterKind, StreamRecord};

let mut stream = BgpStream::new();
stream.add_filter(FilterKind::Collector, "rrc06").unwrap();
stream.add_filter(FilterKind::RecordType, "updates").unwrap();
stream.add_filter(FilterKind::Prefix, "154.73.128.0/17").unwrap();
stream.add_interval_filter(1427846400, 1427846700);
stream.start().unwrap();

let mut record = StreamRecord::new();
while stream.next_record(&mut record).unwrap() {
    let attrs = record.attributes.clone();
    while let Some(elem) = stream.next_elem(&mut record) {
        println!("{}", attrs.elem_line(elem));
    }
}
```

Local files work the same way through the `singlefile` interface:

```no_run
use bgpstream::{BgpStream, StreamRecord};

let mut stream = BgpStream::new();
stream.set_data_interface("singlefile").unwrap();
stream.set_data_interface_option("upd-file", "updates.20150401.gz").unwrap();
stream.start().unwrap();
# let mut record = StreamRecord::new();
# while stream.next_record(&mut record).unwrap() {}
```

Filters can also be given as a one-line expression:

```no_run
# let mut stream = bgpstream::BgpStream::new();
stream.parse_filter_string("proj ris and coll rrc06 and prefix more 10.0.0.0/8").unwrap();
```
*/
pub mod catalogue;
pub mod error;
pub mod filter;
pub mod models;
pub mod stream;

mod elem_gen;
mod input;
mod pool;
mod reader;

pub use crate::error::BgpStreamError;
pub use crate::filter::{FilterKind, FilterStore, TimeInterval};
pub use crate::input::{InputFile, InputQueue};
pub use crate::models::{
    CommunityFilter, DumpPosition, DumpType, ElemType, PatriciaTree, PeerState, RecordStatus,
    RpkiValidation, StreamElem, StreamRecord, BGPSTREAM_FOREVER,
};
pub use crate::stream::{BgpStream, ElemAnnotator, StreamState};
