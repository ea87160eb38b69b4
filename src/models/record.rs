use crate::elem_gen::ElemGenerator;
use bgpkit_parser::models::MrtRecord;
use std::fmt::{Display, Formatter};

/// The kind of dump a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DumpType {
    Rib,
    Update,
}

impl DumpType {
    /// Parses the dump-kind spellings used by the broker and the local
    /// manifests. Both the singular and plural forms are accepted.
    pub fn from_kind_str(s: &str) -> Option<DumpType> {
        match s {
            "rib" | "ribs" => Some(DumpType::Rib),
            "update" | "updates" => Some(DumpType::Update),
            _ => None,
        }
    }

    /// The spelling the broker and manifests use for this kind.
    pub fn as_kind_str(&self) -> &'static str {
        match self {
            DumpType::Rib => "ribs",
            DumpType::Update => "updates",
        }
    }
}

impl Display for DumpType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpType::Rib => write!(f, "R"),
            DumpType::Update => write!(f, "U"),
        }
    }
}

/// Where in its source dump a record sits.
///
/// `Start` marks the first valid record exported from a dump (provided
/// nothing valid was discarded before it), `End` the last export from a
/// reader, everything else is `Middle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpPosition {
    Start,
    Middle,
    End,
}

impl Default for DumpPosition {
    fn default() -> Self {
        DumpPosition::Start
    }
}

impl Display for DumpPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpPosition::Start => write!(f, "B"),
            DumpPosition::Middle => write!(f, "M"),
            DumpPosition::End => write!(f, "E"),
        }
    }
}

/// Status of an emitted record.
///
/// Only `ValidRecord` carries a decoder payload; the other statuses are
/// one-shot terminal reports from a reader, emitted in time order like
/// ordinary records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    ValidRecord,
    /// The dump contained entries, but none passed the time filters.
    FilteredSource,
    /// The dump contained no entries at all.
    EmptySource,
    /// The dump could not be opened after all retries.
    CorruptedSource,
    /// The decoder failed mid-dump.
    CorruptedRecord,
}

impl Display for RecordStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::ValidRecord => write!(f, "V"),
            RecordStatus::FilteredSource => write!(f, "F"),
            RecordStatus::EmptySource => write!(f, "E"),
            RecordStatus::CorruptedSource => write!(f, "S"),
            RecordStatus::CorruptedRecord => write!(f, "R"),
        }
    }
}

/// Provenance attributes copied from the reader at export time.
#[derive(Debug, Clone, Default)]
pub struct RecordAttributes {
    pub project: String,
    pub collector: String,
    pub dump_type: Option<DumpType>,
    /// The nominal time the producer named the dump file for.
    pub dump_time: u32,
    /// The timestamp of this record's MRT entry.
    pub record_time: u32,
}

impl RecordAttributes {
    /// One element line in the canonical pipe-delimited format:
    /// `dump_type|elem_type|record_time|project|collector|<element fields>`.
    ///
    /// Lives on the attributes (rather than the record) so callers can
    /// clone them once and keep formatting elements while the record is
    /// borrowed by its generator.
    pub fn elem_line(&self, elem: &crate::models::StreamElem) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            OptionToStr(&self.dump_type),
            elem.elem_type,
            self.record_time,
            self.project,
            self.collector,
            elem.format_fields(),
        )
    }
}

/// One record of the merged stream.
///
/// A `StreamRecord` is reusable: the façade clears it at the top of
/// every `next_record` call before the pool fills it again. Clearing
/// drops the decoder payload and resets the element generator.
#[derive(Default)]
pub struct StreamRecord {
    pub attributes: RecordAttributes,
    pub status: Option<RecordStatus>,
    pub dump_position: DumpPosition,
    /// The decoded MRT entry, moved out of the reader on export.
    pub(crate) payload: Option<MrtRecord>,
    /// TableDumpV2 peer index table captured by the reader, needed to
    /// expand rib entries into elements.
    pub(crate) peer_index: Option<MrtRecord>,
    pub(crate) generator: ElemGenerator,
}

impl StreamRecord {
    pub fn new() -> StreamRecord {
        StreamRecord::default()
    }

    /// Resets the record so it can be refilled. Reusing one record
    /// across `next_record` calls avoids reallocating the generator.
    pub fn clear(&mut self) {
        self.attributes = RecordAttributes::default();
        self.status = None;
        self.dump_position = DumpPosition::Start;
        self.payload = None;
        self.peer_index = None;
        self.generator.clear();
    }

    pub fn is_valid(&self) -> bool {
        self.status == Some(RecordStatus::ValidRecord)
    }

    /// The `-r` record line:
    /// `type|pos|record_time|project|collector|status|dump_time`.
    pub fn record_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            OptionToStr(&self.attributes.dump_type),
            self.dump_position,
            self.attributes.record_time,
            self.attributes.project,
            self.attributes.collector,
            OptionToStr(&self.status),
            self.attributes.dump_time,
        )
    }

    /// The synthetic rib begin/end line:
    /// `type|pos|record_time|project|collector`.
    pub fn rib_control_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            OptionToStr(&self.attributes.dump_type),
            self.dump_position,
            self.attributes.record_time,
            self.attributes.project,
            self.attributes.collector,
        )
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
