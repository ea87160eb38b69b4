/*!
A reader owns one open dump and walks its entries.

Opening a dump can mean fetching hundreds of megabytes over HTTP, so
every reader spawns a background opener thread at construction; dozens
of dumps in one batch open in parallel while the consumer is still
draining earlier readers. The opener's only job is to open: it tries up
to five times with a doubling wait and publishes either the open parser
or a terminal failure over a one-shot channel. The consumer blocks on
that channel the first time it needs an entry; there is no polling.
*/
use crate::filter::FilterStore;
use crate::input::InputFile;
use crate::models::{DumpPosition, DumpType, RecordStatus, StreamRecord};
use bgpkit_parser::models::{MrtMessage, MrtRecord, TableDumpV2Message};
use bgpkit_parser::BgpkitParser;
use log::{debug, error, warn};
use std::io::Read;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DUMP_OPEN_MAX_RETRIES: u32 = 5;
pub(crate) const DUMP_OPEN_MIN_RETRY_WAIT: Duration = Duration::from_secs(10);

type OpenOutcome = Result<BgpkitParser<Box<dyn Read + Send>>, ()>;

type EntryIter =
    Box<dyn Iterator<Item = Result<MrtRecord, bgpkit_parser::error::ParserErrorWithBytes>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderStatus {
    /// Holding a decoded entry (or optimistically assumed to, before
    /// the first advance).
    ValidEntry,
    /// Entries existed but none passed the time filters.
    FilteredDump,
    /// The dump held no entries at all.
    EmptyDump,
    /// The opener gave up.
    CantOpenDump,
    /// The decoder failed mid-dump.
    CorruptedDump,
    /// All entries consumed.
    EndOfDump,
}

struct Opener {
    thread: JoinHandle<()>,
    outcome: mpsc::Receiver<OpenOutcome>,
}

pub(crate) struct Reader {
    pub(crate) path: String,
    pub(crate) project: String,
    pub(crate) collector: String,
    pub(crate) dump_type: DumpType,
    pub(crate) dump_time: u32,
    /// Timestamp of the current entry; starts at the file time so
    /// readers merge-sort sensibly before their first entry arrives.
    pub(crate) record_time: u32,
    pub(crate) status: ReaderStatus,
    successful_reads: u64,
    valid_reads: u64,
    entry: Option<MrtRecord>,
    /// TableDumpV2 peer index table seen in this dump, replayed into
    /// the element generator of every exported rib record.
    peer_index: Option<MrtRecord>,
    opener: Option<Opener>,
    entries: Option<EntryIter>,
}

impl Reader {
    /// Wraps one input and fires its background opener. The initial
    /// retry wait is the pool's; tests shrink it so the failure path
    /// does not sleep for minutes.
    pub(crate) fn with_retry_wait(input: InputFile, retry_wait: Duration) -> Reader {
        let (sender, outcome) = mpsc::sync_channel(1);
        let path = input.path.clone();
        let thread = thread::spawn(move || {
            let mut delay = retry_wait;
            for attempt in 1..=DUMP_OPEN_MAX_RETRIES {
                match BgpkitParser::new(&path) {
                    Ok(parser) => {
                        let _ = sender.send(Ok(parser));
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "could not open dump {} (attempt {}/{}): {}",
                            path, attempt, DUMP_OPEN_MAX_RETRIES, e
                        );
                        if attempt < DUMP_OPEN_MAX_RETRIES {
                            thread::sleep(delay);
                            delay *= 2;
                        }
                    }
                }
            }
            error!(
                "could not open dump {} after {} attempts, giving up",
                path, DUMP_OPEN_MAX_RETRIES
            );
            let _ = sender.send(Err(()));
        });

        Reader {
            path: input.path,
            project: input.project,
            collector: input.collector,
            dump_type: input.dump_type,
            dump_time: input.file_time,
            record_time: input.file_time,
            status: ReaderStatus::ValidEntry,
            successful_reads: 0,
            valid_reads: 0,
            entry: None,
            peer_index: None,
            opener: Some(Opener { thread, outcome }),
            entries: None,
        }
    }

    /// Entries read but discarded by the time filters so far. The pool
    /// compares this across an advance to decide whether the last
    /// export really was the final entry of its dump.
    pub(crate) fn discarded_reads(&self) -> u64 {
        self.successful_reads - self.valid_reads
    }

    /// Blocks until the opener published its outcome; no-op afterward.
    fn wait_for_open(&mut self) {
        let opener = match self.opener.take() {
            Some(opener) => opener,
            None => return,
        };
        match opener.outcome.recv() {
            Ok(Ok(parser)) => {
                self.entries = Some(Box::new(parser.into_fallible_record_iter()));
            }
            Ok(Err(())) | Err(_) => {
                self.status = ReaderStatus::CantOpenDump;
            }
        }
        if opener.thread.join().is_err() {
            error!("dump opener for {} panicked", self.path);
            self.status = ReaderStatus::CantOpenDump;
        }
    }

    /// Reads entries until one passes the coarse time filter, or the
    /// dump ends. Element-level filtering happens later, per element.
    pub(crate) fn advance(&mut self, filters: &FilterStore) {
        if self.status != ReaderStatus::ValidEntry {
            // the previous read already parked this reader
            return;
        }
        // the previous entry now lives in the exported record
        self.entry = None;

        self.wait_for_open();
        if self.status == ReaderStatus::CantOpenDump {
            return;
        }
        let entries = match self.entries.as_mut() {
            Some(entries) => entries,
            None => {
                self.status = ReaderStatus::CantOpenDump;
                return;
            }
        };

        loop {
            match entries.next() {
                Some(Ok(record)) => {
                    if let MrtMessage::TableDumpV2Message(TableDumpV2Message::PeerIndexTable(_)) =
                        &record.message
                    {
                        // peer metadata, not a routing entry
                        self.peer_index = Some(record);
                        continue;
                    }
                    self.successful_reads += 1;
                    let time = record.common_header.timestamp;
                    if filters.time_passes(time) {
                        self.valid_reads += 1;
                        self.record_time = time;
                        self.entry = Some(record);
                        return;
                    }
                }
                Some(Err(e)) => {
                    debug!("decode failure in {}: {}", self.path, e);
                    self.status = ReaderStatus::CorruptedDump;
                    return;
                }
                None => {
                    self.status = if self.successful_reads == 0 {
                        ReaderStatus::EmptyDump
                    } else if self.valid_reads == 0 {
                        ReaderStatus::FilteredDump
                    } else {
                        ReaderStatus::EndOfDump
                    };
                    return;
                }
            }
        }
    }

    /// Copies the reader's attributes into the record and moves the
    /// current entry over.
    ///
    /// When the exported record reports a corrupted source or entry,
    /// the rib-period bookkeeping for this (project, collector) is
    /// reset: a corrupted rib must not inhibit admission of the next
    /// good one.
    pub(crate) fn export_into(&mut self, record: &mut StreamRecord, filters: &mut FilterStore) {
        if self.status == ReaderStatus::EndOfDump {
            debug!("export requested after end of dump");
            return;
        }
        record.payload = self.entry.take();
        record.peer_index = self.peer_index.clone();
        record.attributes.project = self.project.clone();
        record.attributes.collector = self.collector.clone();
        record.attributes.dump_type = Some(self.dump_type);
        record.attributes.dump_time = self.dump_time;
        record.attributes.record_time = self.record_time;
        record.dump_position = if self.valid_reads == 1 && self.successful_reads == 1 {
            DumpPosition::Start
        } else {
            DumpPosition::Middle
        };
        let status = match self.status {
            ReaderStatus::ValidEntry => RecordStatus::ValidRecord,
            ReaderStatus::FilteredDump => RecordStatus::FilteredSource,
            ReaderStatus::EmptyDump => RecordStatus::EmptySource,
            ReaderStatus::CantOpenDump => RecordStatus::CorruptedSource,
            ReaderStatus::CorruptedDump => RecordStatus::CorruptedRecord,
            ReaderStatus::EndOfDump => RecordStatus::EmptySource,
        };
        record.status = Some(status);

        if matches!(
            status,
            RecordStatus::CorruptedSource | RecordStatus::CorruptedRecord
        ) {
            filters.rib_period_reset(&self.project, &self.collector);
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        // the opener must never outlive its reader
        if let Some(opener) = self.opener.take() {
            drop(opener.outcome);
            if opener.thread.join().is_err() {
                error!("dump opener for {} panicked", self.path);
            }
        }
    }
}
