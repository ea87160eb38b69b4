/*!
The singlefile catalogue: stream one rib file and/or one update file,
re-offering a path when its content rotates underneath us.

Rotation is detected without parsing MRT: if the per-kind re-check
window has elapsed (30 minutes for ribs, 2 minutes for updates) and the
first KiB of the file differs from what we saw last time, the path is
pushed again with a fresh file time.
*/
use crate::error::BgpStreamError;
use crate::input::{InputFile, InputQueue};
use crate::models::DumpType;
use log::{debug, warn};
use std::io::Read;

/// Re-check a rib path at most twice per hour.
const RIB_FREQUENCY_CHECK: u32 = 1800;
/// Updates roll faster; re-check every two minutes.
const UPDATE_FREQUENCY_CHECK: u32 = 120;

const MAX_HEADER_READ_BYTES: usize = 1024;

struct WatchedFile {
    path: String,
    dump_type: DumpType,
    frequency: u32,
    header: Vec<u8>,
    last_file_time: u32,
}

impl WatchedFile {
    fn new(path: String, dump_type: DumpType, frequency: u32) -> WatchedFile {
        WatchedFile {
            path,
            dump_type,
            frequency,
            header: Vec::new(),
            last_file_time: 0,
        }
    }

    /// Reads the file's first KiB and compares against the stored
    /// header, updating it when different. Unreadable files are
    /// reported as unchanged so a transient glitch does not push a
    /// bogus input.
    fn header_changed(&mut self) -> bool {
        let mut reader = match oneio::get_reader(&self.path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("cannot probe {}: {}", self.path, e);
                return false;
            }
        };
        let mut buffer = vec![0u8; MAX_HEADER_READ_BYTES];
        let mut filled = 0;
        while filled < buffer.len() {
            match reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    warn!("cannot probe {}: {}", self.path, e);
                    return false;
                }
            }
        }
        buffer.truncate(filled);
        if buffer == self.header {
            return false;
        }
        self.header = buffer;
        true
    }
}

pub struct SingleFileCatalogue {
    files: Vec<WatchedFile>,
}

impl SingleFileCatalogue {
    pub fn new(options: &[(String, String)]) -> SingleFileCatalogue {
        let mut files = Vec::new();
        for (option, value) in options {
            match option.as_str() {
                "rib-file" => files.push(WatchedFile::new(
                    value.clone(),
                    DumpType::Rib,
                    RIB_FREQUENCY_CHECK,
                )),
                "upd-file" => files.push(WatchedFile::new(
                    value.clone(),
                    DumpType::Update,
                    UPDATE_FREQUENCY_CHECK,
                )),
                _ => {}
            }
        }
        SingleFileCatalogue { files }
    }

    pub fn refresh(&mut self, queue: &mut InputQueue) -> Result<usize, BgpStreamError> {
        let now = chrono::Utc::now().timestamp() as u32;
        let mut num_results = 0;
        for file in &mut self.files {
            if now.saturating_sub(file.last_file_time) <= file.frequency {
                continue;
            }
            if !file.header_changed() {
                continue;
            }
            debug!("new {} content at {}", file.dump_type.as_kind_str(), now);
            file.last_file_time = now;
            let pushed = queue.push_sorted(InputFile {
                path: file.path.clone(),
                project: "singlefile".to_string(),
                collector: "singlefile".to_string(),
                dump_type: file.dump_type,
                file_time: now,
                time_span: file.frequency,
            });
            if pushed {
                num_results += 1;
            }
        }
        Ok(num_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options_for(path: &str, kind: &str) -> Vec<(String, String)> {
        vec![(kind.to_string(), path.to_string())]
    }

    #[test]
    fn test_first_refresh_pushes_both_paths() {
        let mut rib = tempfile::NamedTempFile::new().unwrap();
        rib.write_all(b"rib bytes").unwrap();
        let mut upd = tempfile::NamedTempFile::new().unwrap();
        upd.write_all(b"update bytes").unwrap();

        let options = vec![
            ("rib-file".to_string(), rib.path().to_str().unwrap().to_string()),
            ("upd-file".to_string(), upd.path().to_str().unwrap().to_string()),
        ];
        let mut catalogue = SingleFileCatalogue::new(&options);
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue).unwrap(), 2);
        assert_eq!(queue.len(), 2);
        // ribs sort first at the shared file time
        let batch = queue.take_ready_batch();
        assert_eq!(batch[0].dump_type, DumpType::Rib);
    }

    #[test]
    fn test_unchanged_file_within_window_is_not_repushed() {
        let mut upd = tempfile::NamedTempFile::new().unwrap();
        upd.write_all(b"update bytes").unwrap();

        let mut catalogue =
            SingleFileCatalogue::new(&options_for(upd.path().to_str().unwrap(), "upd-file"));
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue).unwrap(), 1);
        // immediately again: the frequency window has not elapsed
        assert_eq!(catalogue.refresh(&mut queue).unwrap(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_rotation_detection_needs_changed_header() {
        let mut upd = tempfile::NamedTempFile::new().unwrap();
        upd.write_all(b"generation one").unwrap();
        upd.flush().unwrap();

        let mut catalogue =
            SingleFileCatalogue::new(&options_for(upd.path().to_str().unwrap(), "upd-file"));
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue).unwrap(), 1);
        queue.take_ready_batch();

        // pretend the frequency window elapsed; same bytes, no push
        catalogue.files[0].last_file_time = 0;
        assert_eq!(catalogue.refresh(&mut queue).unwrap(), 0);

        // rotate the file: frequency elapsed + different header
        upd.as_file().set_len(0).unwrap();
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .open(upd.path())
            .unwrap();
        f.write_all(b"generation two").unwrap();
        f.flush().unwrap();
        catalogue.files[0].last_file_time = 0;
        assert_eq!(catalogue.refresh(&mut queue).unwrap(), 1);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let mut catalogue =
            SingleFileCatalogue::new(&options_for("/nonexistent/ribs.gz", "rib-file"));
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue).unwrap(), 0);
    }
}
