/*!
The reader pool: a merge over many open dumps.

Readers are kept sorted by the timestamp of their current entry, rib
readers ahead of update readers at equal times, insertion order
preserved beyond that. The head reader therefore always holds the
earliest record of the whole stream; the pool is a merge sort over many
already-sorted sources where only the minimum is ever needed, so a
sorted vector beats a fancier structure at the dozens-to-hundreds of
readers a batch produces.
*/
use crate::filter::FilterStore;
use crate::input::InputFile;
use crate::models::{DumpPosition, DumpType, StreamRecord};
use crate::reader::{Reader, ReaderStatus, DUMP_OPEN_MIN_RETRY_WAIT};
use log::debug;
use std::time::Duration;

pub(crate) struct ReaderPool {
    queue: Vec<Reader>,
    /// Initial opener retry wait, shrunk by tests.
    retry_wait: Duration,
}

impl Default for ReaderPool {
    fn default() -> Self {
        ReaderPool {
            queue: Vec::new(),
            retry_wait: DUMP_OPEN_MIN_RETRY_WAIT,
        }
    }
}

impl ReaderPool {
    pub(crate) fn new() -> ReaderPool {
        ReaderPool::default()
    }

    #[cfg(test)]
    fn with_retry_wait(retry_wait: Duration) -> ReaderPool {
        ReaderPool {
            queue: Vec::new(),
            retry_wait,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Turns a batch of inputs into readers and inserts them.
    ///
    /// All readers are constructed first so their openers run in
    /// parallel; only then does the first (blocking) advance happen.
    /// Inputs refused by the rib-period admission test are dropped
    /// here, before any opener spawns.
    pub(crate) fn add(&mut self, batch: Vec<InputFile>, filters: &mut FilterStore) {
        let mut readers = Vec::with_capacity(batch.len());
        for input in batch {
            if !filters.rib_period_check(
                &input.project,
                &input.collector,
                input.dump_type,
                input.file_time,
            ) {
                debug!("rib period filter drops {}", input.path);
                continue;
            }
            readers.push(Reader::with_retry_wait(input, self.retry_wait));
        }
        for mut reader in readers {
            reader.advance(filters);
            self.sorted_insert(reader);
        }
    }

    fn sorted_insert(&mut self, reader: Reader) {
        let mut pos = self.queue.len();
        for (i, queued) in self.queue.iter().enumerate() {
            if queued.record_time < reader.record_time {
                continue;
            }
            if queued.record_time == reader.record_time
                && !(reader.dump_type == DumpType::Rib && queued.dump_type == DumpType::Update)
            {
                continue;
            }
            pos = i;
            break;
        }
        self.queue.insert(pos, reader);
    }

    /// Exports the earliest record into `record` and re-sorts or
    /// retires the head reader. Returns false when the pool is empty.
    pub(crate) fn next_record(
        &mut self,
        record: &mut StreamRecord,
        filters: &mut FilterStore,
    ) -> bool {
        let head = match self.queue.first_mut() {
            None => return false,
            Some(head) => head,
        };

        let discarded_before = head.discarded_reads();
        head.export_into(record, filters);

        if head.status == ReaderStatus::ValidEntry {
            let previous_time = record.attributes.record_time;
            head.advance(filters);
            if head.status == ReaderStatus::EndOfDump {
                // the exported entry was the dump's last; unless valid
                // entries were discarded on the way out, mark it as the
                // end of its dump
                if head.discarded_reads() == discarded_before {
                    record.dump_position = DumpPosition::End;
                }
                self.queue.remove(0);
            } else if head.record_time != previous_time {
                let reader = self.queue.remove(0);
                self.sorted_insert(reader);
            }
            // unchanged time: the head stays the head, no re-sort needed
        } else {
            // a terminal status was just exported as a record
            record.dump_position = DumpPosition::End;
            self.queue.remove(0);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;

    fn input(path: &str, file_time: u32, dump_type: DumpType, collector: &str) -> InputFile {
        InputFile {
            path: path.to_string(),
            project: "ris".to_string(),
            collector: collector.to_string(),
            dump_type,
            file_time,
            time_span: 120,
        }
    }

    fn empty_dump() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = ReaderPool::with_retry_wait(Duration::from_millis(1));
        let mut filters = FilterStore::new();
        let mut record = StreamRecord::new();
        assert!(!pool.next_record(&mut record, &mut filters));
    }

    #[test]
    fn test_terminal_records_in_time_order() {
        // two empty dumps with different nominal times: their terminal
        // records must come out in file-time order
        let early = empty_dump();
        let late = empty_dump();
        let mut pool = ReaderPool::with_retry_wait(Duration::from_millis(1));
        let mut filters = FilterStore::new();
        pool.add(
            vec![
                input(late.path().to_str().unwrap(), 2000, DumpType::Update, "rrc01"),
                input(early.path().to_str().unwrap(), 1000, DumpType::Update, "rrc00"),
            ],
            &mut filters,
        );
        assert_eq!(pool.len(), 2);

        let mut record = StreamRecord::new();
        assert!(pool.next_record(&mut record, &mut filters));
        assert_eq!(record.attributes.collector, "rrc00");
        assert_eq!(record.status, Some(RecordStatus::EmptySource));
        assert_eq!(record.dump_position, DumpPosition::End);

        record.clear();
        assert!(pool.next_record(&mut record, &mut filters));
        assert_eq!(record.attributes.collector, "rrc01");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_rib_sorts_before_update_at_equal_time() {
        let a = empty_dump();
        let b = empty_dump();
        let mut pool = ReaderPool::with_retry_wait(Duration::from_millis(1));
        let mut filters = FilterStore::new();
        pool.add(
            vec![
                input(a.path().to_str().unwrap(), 1000, DumpType::Update, "rrc00"),
                input(b.path().to_str().unwrap(), 1000, DumpType::Rib, "rrc00"),
            ],
            &mut filters,
        );
        let mut record = StreamRecord::new();
        assert!(pool.next_record(&mut record, &mut filters));
        assert_eq!(record.attributes.dump_type, Some(DumpType::Rib));
    }

    #[test]
    fn test_rib_period_admission() {
        let a = empty_dump();
        let b = empty_dump();
        let mut pool = ReaderPool::with_retry_wait(Duration::from_millis(1));
        let mut filters = FilterStore::new();
        filters.set_rib_period(3600);
        // two ribs 1800 s apart for the same collector: only the first
        // becomes a reader
        pool.add(
            vec![
                input(a.path().to_str().unwrap(), 1000, DumpType::Rib, "rrc00"),
                input(b.path().to_str().unwrap(), 2800, DumpType::Rib, "rrc00"),
            ],
            &mut filters,
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_filtered_dump_status() {
        // an unopenable path surfaces as a corrupted source with the
        // end position, then disappears from the pool
        let mut pool = ReaderPool::with_retry_wait(Duration::from_millis(1));
        let mut filters = FilterStore::new();
        pool.add(
            vec![input("/nonexistent/u.gz", 1000, DumpType::Update, "rrc00")],
            &mut filters,
        );
        let mut record = StreamRecord::new();
        // the opener retries with the production backoff only on real
        // paths that exist-then-fail; a missing local file fails fast
        assert!(pool.next_record(&mut record, &mut filters));
        assert_eq!(record.status, Some(RecordStatus::CorruptedSource));
        assert_eq!(record.dump_position, DumpPosition::End);
        assert!(pool.is_empty());
    }
}
