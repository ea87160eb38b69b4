/*!
The stream façade: lifecycle, configuration surface, and the
`next_record` / `next_elem` drivers.

A stream is configured while `Allocated` (filters, data interface,
options, live mode), switched `On` by [`BgpStream::start`], and `Off` by
[`BgpStream::stop`]. `next_record` drains the reader pool; when the pool
runs dry it refills from the input queue, and when the queue runs dry it
asks the catalogue for more. With a live interval configured, an empty
catalogue answer means "sleep and ask again" instead of end-of-stream.

```no_run
use bgpstream::{BgpStream, FilterKind, StreamRecord};

let mut stream = BgpStream::new();
stream.add_filter(FilterKind::Collector, "rrc06").unwrap();
stream.add_interval_filter(1427846400, 1427850000);
stream.start().unwrap();

let mut record = StreamRecord::new();
while stream.next_record(&mut record).unwrap() {
    if record.is_valid() {
        while let Some(elem) = stream.next_elem(&mut record) {
            println!("{}", elem);
        }
    }
}
```
*/
use crate::catalogue::{data_interface_options, is_data_interface, Catalogue};
use crate::error::BgpStreamError;
use crate::filter::{parser, FilterKind, FilterStore};
use crate::input::InputQueue;
use crate::models::{DumpType, RecordStatus, StreamElem, StreamRecord, BGPSTREAM_FOREVER};
use crate::pool::ReaderPool;
use log::{debug, info};
use std::thread;
use std::time::Duration;

/// First sleep when a live refresh comes back empty.
const REFRESH_MIN_WAIT: u64 = 30;
/// Sleep cap for consecutive empty live refreshes.
const REFRESH_MAX_WAIT: u64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Accepting configuration.
    Allocated,
    /// Producing records.
    On,
    /// Stopped; terminal.
    Off,
}

/// A pluggable element decorator, applied between generation and the
/// filter pass. Implementations (e.g. an RPKI validator) may only fill
/// the element's `rpki` annotation slot; the core fields belong to the
/// decoder.
pub trait ElemAnnotator {
    fn annotate(&self, elem: &mut StreamElem);
}

pub struct BgpStream {
    state: StreamState,
    filters: FilterStore,
    interface: String,
    options: Vec<(String, String)>,
    live: bool,
    catalogue: Option<Catalogue>,
    input_queue: InputQueue,
    pool: ReaderPool,
    refresh_wait: u64,
    annotator: Option<Box<dyn ElemAnnotator>>,
}

impl Default for BgpStream {
    fn default() -> Self {
        BgpStream::new()
    }
}

impl BgpStream {
    pub fn new() -> BgpStream {
        BgpStream {
            state: StreamState::Allocated,
            filters: FilterStore::new(),
            interface: "broker".to_string(),
            options: Vec::new(),
            live: false,
            catalogue: None,
            input_queue: InputQueue::new(),
            pool: ReaderPool::new(),
            refresh_wait: REFRESH_MIN_WAIT,
            annotator: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn filters(&self) -> &FilterStore {
        &self.filters
    }

    fn configurable(&self) -> Result<(), BgpStreamError> {
        match self.state {
            StreamState::Allocated => Ok(()),
            _ => Err(BgpStreamError::ConfigError(
                "stream can only be configured before start".to_string(),
            )),
        }
    }

    /// Appends one filter value; see [`FilterKind`] for the axes.
    pub fn add_filter(&mut self, kind: FilterKind, value: &str) -> Result<(), BgpStreamError> {
        self.configurable()?;
        self.filters.add(kind, value)
    }

    /// Appends a `[begin, end]` time window of interest. An end of
    /// [`BGPSTREAM_FOREVER`] declares live interest and switches the
    /// catalogue refresh loop to blocking mode.
    pub fn add_interval_filter(&mut self, begin: u32, end: u32) {
        if self.configurable().is_err() {
            return;
        }
        if end == BGPSTREAM_FOREVER {
            self.live = true;
        }
        self.filters.add_interval(begin, end);
    }

    /// Adds a rolling window reaching `interval` ("<n> <unit>", unit
    /// one of s/m/h/d) back from now. With `live` the window never
    /// closes.
    pub fn add_recent_interval_filter(
        &mut self,
        interval: &str,
        live: bool,
    ) -> Result<(), BgpStreamError> {
        self.configurable()?;
        let seconds = parse_recent_interval(interval)?;
        let now = chrono::Utc::now().timestamp() as u32;
        let begin = now.saturating_sub(seconds);
        let end = if live { BGPSTREAM_FOREVER } else { now };
        self.add_interval_filter(begin, end);
        Ok(())
    }

    /// One rib per `period` seconds per (project, collector); 0
    /// disables the throttle.
    pub fn add_rib_period_filter(&mut self, period: u32) {
        if self.configurable().is_err() {
            return;
        }
        self.filters.set_rib_period(period);
    }

    /// Applies a filter DSL string (see [`crate::filter::parser`]).
    pub fn parse_filter_string(&mut self, input: &str) -> Result<(), BgpStreamError> {
        self.configurable()?;
        parser::parse_filter_string(&mut self.filters, input)
    }

    /// Selects the data interface by name (`broker`, `singlefile`,
    /// `csvfile`, `sqlite`).
    pub fn set_data_interface(&mut self, name: &str) -> Result<(), BgpStreamError> {
        self.configurable()?;
        if !is_data_interface(name) {
            return Err(BgpStreamError::ConfigError(format!(
                "invalid data interface name '{name}'"
            )));
        }
        self.interface = name.to_string();
        Ok(())
    }

    pub fn data_interface(&self) -> &str {
        &self.interface
    }

    /// Sets an `(option, value)` pair for the selected interface.
    /// Repeatable options (the broker's `param`) accumulate.
    pub fn set_data_interface_option(
        &mut self,
        option: &str,
        value: &str,
    ) -> Result<(), BgpStreamError> {
        self.configurable()?;
        let known = data_interface_options(&self.interface)
            .map(|opts| opts.iter().any(|o| o.name == option))
            .unwrap_or(false);
        if !known {
            return Err(BgpStreamError::ConfigError(format!(
                "invalid option '{}' for data interface '{}'",
                option, self.interface
            )));
        }
        self.options.push((option.to_string(), value.to_string()));
        Ok(())
    }

    /// Blocks `next_record` on catalogue exhaustion instead of ending
    /// the stream.
    pub fn set_live_mode(&mut self) {
        if self.configurable().is_ok() {
            self.live = true;
        }
    }

    /// Installs an element decorator, run between generation and the
    /// element filter pass.
    pub fn set_elem_annotator(&mut self, annotator: Box<dyn ElemAnnotator>) {
        self.annotator = Some(annotator);
    }

    /// Validates the filters, builds the catalogue and turns the
    /// stream on.
    pub fn start(&mut self) -> Result<(), BgpStreamError> {
        self.configurable()?;
        self.filters.validate()?;
        let catalogue = Catalogue::build(&self.interface, &self.options, &self.filters)?;
        self.catalogue = Some(catalogue);
        self.state = StreamState::On;
        info!("stream started on data interface '{}'", self.interface);
        Ok(())
    }

    /// Fills `record` with the next record of the merged stream.
    ///
    /// Returns `Ok(true)` when a record was produced, `Ok(false)` at
    /// the end of the stream (never in live mode), and an error on
    /// fatal catalogue failure. The record is cleared first, so the
    /// same record can be reused across calls. Every valid record has
    /// passed [`FilterStore::record_passes`]; terminal status reports
    /// are never withheld, so consumers see reader failures in time
    /// order.
    pub fn next_record(&mut self, record: &mut StreamRecord) -> Result<bool, BgpStreamError> {
        if self.state != StreamState::On {
            return Err(BgpStreamError::ConfigError(
                "next_record called on a stream that is not on".to_string(),
            ));
        }
        record.clear();

        loop {
            while self.pool.is_empty() {
                while self.input_queue.is_empty() {
                    let catalogue = match self.catalogue.as_mut() {
                        Some(catalogue) => catalogue,
                        None => {
                            return Err(BgpStreamError::ConfigError(
                                "stream has no active catalogue".to_string(),
                            ))
                        }
                    };
                    let results = catalogue.refresh(&mut self.input_queue, &self.filters)?;
                    if results > 0 {
                        self.refresh_wait = REFRESH_MIN_WAIT;
                        continue;
                    }
                    if !self.live {
                        debug!("catalogue exhausted, end of stream");
                        return Ok(false);
                    }
                    debug!("live refresh empty, sleeping {}s", self.refresh_wait);
                    thread::sleep(Duration::from_secs(self.refresh_wait));
                    self.refresh_wait = (self.refresh_wait * 2).min(REFRESH_MAX_WAIT);
                }
                let batch = self.input_queue.take_ready_batch();
                debug!("activating a batch of {} input(s)", batch.len());
                self.pool.add(batch, &mut self.filters);
            }
            if !self.pool.next_record(record, &mut self.filters) {
                continue;
            }
            // the record-level gate: catalogues and readers pre-filter
            // by these axes, so this only drops valid records whose
            // provenance escaped them (e.g. a project filter combined
            // with the singlefile interface)
            if record.is_valid() && !self.filters.record_passes(record) {
                debug!(
                    "record from {}.{} dropped by record filters",
                    record.attributes.project, record.attributes.collector
                );
                record.clear();
                continue;
            }
            return Ok(true);
        }
    }

    /// Yields the next element of `record` that passes the element
    /// filters, expanding the record's payload on first use. Returns
    /// None when the record is exhausted (or not a valid record).
    pub fn next_elem<'r>(&self, record: &'r mut StreamRecord) -> Option<&'r StreamElem> {
        if record.status != Some(RecordStatus::ValidRecord) {
            return None;
        }
        if !record.generator.is_populated() {
            let payload = record.payload.as_ref()?;
            let dump_type = record.attributes.dump_type.unwrap_or(DumpType::Update);
            record
                .generator
                .populate(payload, record.peer_index.as_ref(), dump_type);
        }
        let filters = &self.filters;
        let annotator = self.annotator.as_deref();
        record.generator.next_matching(|elem| {
            if let Some(annotator) = annotator {
                annotator.annotate(elem);
            }
            filters.element_passes(elem)
        })
    }

    /// Turns the stream off. Terminal; readers still in the pool are
    /// destroyed (joining their openers) and the catalogue is torn
    /// down.
    pub fn stop(&mut self) {
        if self.state != StreamState::On {
            return;
        }
        self.pool = ReaderPool::new();
        self.input_queue = InputQueue::new();
        self.catalogue = None;
        self.state = StreamState::Off;
        info!("stream stopped");
    }
}

/// Parses "<n> <unit>" into seconds, unit one of s, m, h, d.
fn parse_recent_interval(interval: &str) -> Result<u32, BgpStreamError> {
    let err = || {
        BgpStreamError::ConfigError(format!(
            "invalid interval '{interval}', expected \"<num> <unit>\" with unit s/m/h/d"
        ))
    };
    let mut tokens = interval.split_whitespace();
    let number: u32 = tokens.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let unit = tokens.next().ok_or_else(err)?;
    if tokens.next().is_some() {
        return Err(err());
    }
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(err()),
    };
    number.checked_mul(multiplier).ok_or_else(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElemType, RpkiValidation};
    use std::io::Write;

    #[test]
    fn test_lifecycle_guards() {
        let mut stream = BgpStream::new();
        assert_eq!(stream.state(), StreamState::Allocated);
        stream.add_filter(FilterKind::Project, "ris").unwrap();
        stream.set_data_interface("singlefile").unwrap();
        stream
            .set_data_interface_option("upd-file", "/tmp/updates.gz")
            .unwrap();
        stream.start().unwrap();
        assert_eq!(stream.state(), StreamState::On);

        // configuration after start is refused
        assert!(stream.add_filter(FilterKind::Project, "routeviews").is_err());
        assert!(stream.set_data_interface("csvfile").is_err());

        stream.stop();
        assert_eq!(stream.state(), StreamState::Off);
        // off is terminal
        assert!(stream.start().is_err());
    }

    #[test]
    fn test_invalid_interval_fails_start() {
        let mut stream = BgpStream::new();
        stream.set_data_interface("singlefile").unwrap();
        stream.add_interval_filter(200, 100);
        assert!(stream.start().is_err());
    }

    #[test]
    fn test_unknown_interface_and_option() {
        let mut stream = BgpStream::new();
        assert!(stream.set_data_interface("postgres").is_err());
        assert!(stream.set_data_interface_option("frequency", "10").is_err());
    }

    #[test]
    fn test_live_flag_from_interval() {
        let mut stream = BgpStream::new();
        stream.add_interval_filter(100, crate::models::BGPSTREAM_FOREVER);
        assert!(stream.live);
        assert!(stream.filters().has_live_interval());
    }

    #[test]
    fn test_parse_recent_interval() {
        assert_eq!(parse_recent_interval("30 s").unwrap(), 30);
        assert_eq!(parse_recent_interval("5 m").unwrap(), 300);
        assert_eq!(parse_recent_interval("2 h").unwrap(), 7200);
        assert_eq!(parse_recent_interval("1 d").unwrap(), 86400);
        assert!(parse_recent_interval("five m").is_err());
        assert!(parse_recent_interval("5 weeks").is_err());
        assert!(parse_recent_interval("5").is_err());
    }

    #[test]
    fn test_end_of_stream_with_empty_sources() {
        // singlefile over two empty temp files: the stream produces one
        // terminal record per source, then reports end of stream
        let mut rib = tempfile::NamedTempFile::new().unwrap();
        rib.write_all(&[]).unwrap();
        let mut upd = tempfile::NamedTempFile::new().unwrap();
        upd.write_all(&[]).unwrap();

        let mut stream = BgpStream::new();
        stream.set_data_interface("singlefile").unwrap();
        stream
            .set_data_interface_option("rib-file", rib.path().to_str().unwrap())
            .unwrap();
        stream
            .set_data_interface_option("upd-file", upd.path().to_str().unwrap())
            .unwrap();
        stream.start().unwrap();

        let mut record = StreamRecord::new();
        let mut statuses = Vec::new();
        while stream.next_record(&mut record).unwrap() {
            statuses.push(record.status);
        }
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .all(|s| *s == Some(RecordStatus::EmptySource)));
        // empty records expand to no elements
        assert!(stream.next_elem(&mut record).is_none());
    }

    #[test]
    fn test_terminal_records_bypass_record_gate() {
        // a project filter that matches nothing must not withhold the
        // per-reader terminal status reports
        let mut upd = tempfile::NamedTempFile::new().unwrap();
        upd.write_all(&[]).unwrap();

        let mut stream = BgpStream::new();
        stream.add_filter(FilterKind::Project, "ris").unwrap();
        stream.set_data_interface("singlefile").unwrap();
        stream
            .set_data_interface_option("upd-file", upd.path().to_str().unwrap())
            .unwrap();
        stream.start().unwrap();

        let mut record = StreamRecord::new();
        assert!(stream.next_record(&mut record).unwrap());
        assert_eq!(record.status, Some(RecordStatus::EmptySource));
        assert!(!stream.next_record(&mut record).unwrap());
    }

    #[test]
    fn test_annotator_runs_before_filters() {
        struct MarkEverything;
        impl ElemAnnotator for MarkEverything {
            fn annotate(&self, elem: &mut StreamElem) {
                elem.rpki = Some(RpkiValidation::NotFound);
            }
        }
        let mut stream = BgpStream::new();
        stream.set_elem_annotator(Box::new(MarkEverything));
        // drive the annotator through a synthetic valid record
        let mut record = StreamRecord::new();
        record.status = Some(RecordStatus::ValidRecord);
        record.generator.populate_for_tests(vec![StreamElem {
            elem_type: ElemType::Withdraw,
            prefix: Some("10.0.0.0/8".parse().unwrap()),
            ..Default::default()
        }]);
        let elem = stream.next_elem(&mut record).unwrap();
        assert_eq!(elem.rpki, Some(RpkiValidation::NotFound));
    }
}
