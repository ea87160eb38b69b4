/*!
The input queue: a time-sorted list of dump files waiting to be opened.

Catalogues push discovered files here; the façade drains it in batches
whose covered time intervals overlap, so that every reader in a batch
can contribute to the same stretch of the merged stream.
*/
use crate::models::DumpType;
use log::{debug, warn};

/// Cap on the number of entries handed out per batch, which bounds the
/// number of concurrently open dumps.
const MAX_BATCH_LEN: usize = 200;

/// One dump file queued for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Local path or URL, whatever the opener understands.
    pub path: String,
    pub project: String,
    pub collector: String,
    pub dump_type: DumpType,
    /// The nominal time the producer named the file for (unix seconds).
    pub file_time: u32,
    /// Seconds of routing activity the file covers.
    pub time_span: u32,
}

impl InputFile {
    /// The time interval this file affects. A rib snapshot dumped at T
    /// reflects activity around T in both directions; an update file
    /// covers forward from its file time.
    fn covered_interval(&self) -> (i64, i64) {
        let t = self.file_time as i64;
        let span = self.time_span as i64;
        match self.dump_type {
            DumpType::Rib => (t - span, t + span),
            DumpType::Update => (t, t + span),
        }
    }
}

/// FIFO of [`InputFile`]s kept sorted by file time, ribs before updates
/// at equal times, with duplicate suppression.
#[derive(Default)]
pub struct InputQueue {
    queue: Vec<InputFile>,
}

impl InputQueue {
    pub fn new() -> InputQueue {
        InputQueue::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Inserts an input in sorted position. Returns false (and pushes
    /// nothing) when an entry with the same
    /// (file_time, project, collector, kind) is already queued, or when
    /// any of the name fields is empty.
    pub fn push_sorted(&mut self, input: InputFile) -> bool {
        if input.path.is_empty()
            || input.project.is_empty()
            || input.collector.is_empty()
        {
            warn!("refusing input with empty fields: {:?}", input);
            return false;
        }

        let mut pos = self.queue.len();
        for (i, queued) in self.queue.iter().enumerate() {
            if queued.file_time < input.file_time {
                continue;
            }
            if queued.file_time == input.file_time {
                if queued.project == input.project
                    && queued.collector == input.collector
                    && queued.dump_type == input.dump_type
                {
                    debug!("suppressing duplicate input {}", input.path);
                    return false;
                }
                // ribs sort before updates at the same file time
                if !(input.dump_type == DumpType::Rib && queued.dump_type == DumpType::Update) {
                    continue;
                }
            }
            pos = i;
            break;
        }
        debug!("queued input {} at {}", input.path, pos);
        self.queue.insert(pos, input);
        true
    }

    /// Removes and returns the longest queue prefix whose covered
    /// intervals overlap the running union of already-taken intervals,
    /// up to the 200-entry cap.
    ///
    /// Every update affects its own span; every rib affects one span on
    /// either side of its file time. Starting from the head entry, the
    /// next entry joins the batch while its interval starts before the
    /// union's current end, and the union end grows as entries join.
    pub fn take_ready_batch(&mut self) -> Vec<InputFile> {
        let first = match self.queue.first() {
            None => return Vec::new(),
            Some(first) => first,
        };
        let (_, mut batch_end) = first.covered_interval();

        let mut taken = 1;
        for input in self.queue.iter().skip(1).take(MAX_BATCH_LEN - 1) {
            let (start, end) = input.covered_interval();
            if start >= batch_end {
                break;
            }
            if end > batch_end {
                batch_end = end;
            }
            taken += 1;
        }
        self.queue.drain(..taken).collect()
    }
}
