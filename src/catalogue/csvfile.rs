/*!
The csvfile catalogue: a local (or remote) manifest listing dump files,
one per line, with seven comma-separated columns:

```text
path,project,type,collector,file_time,time_span,timestamp
```

`timestamp` records when the row was added to the manifest. A refresh
re-reads the whole file but only admits rows whose timestamp falls in
`(last_processed_ts, now - 1s]`, so a growing manifest can be re-scanned
without pushing duplicates.
*/
use crate::error::BgpStreamError;
use crate::filter::FilterStore;
use crate::input::{InputFile, InputQueue};
use crate::models::DumpType;
use log::warn;
use std::io::{BufRead, BufReader};

/// Rows sometimes carry a file time slightly before the window they
/// belong to (`rib.23.59` naming instead of `rib.00.00`); interval
/// begins are slackened by one routeviews period plus a safety margin.
const FILE_TIME_MARGIN: u32 = 15 * 60 + 120;

pub struct CsvFileCatalogue {
    path: String,
    last_processed_ts: u32,
}

impl CsvFileCatalogue {
    pub fn new(options: &[(String, String)]) -> Result<CsvFileCatalogue, BgpStreamError> {
        let mut path = None;
        for (option, value) in options {
            if option == "csv-file" {
                path = Some(value.clone());
            }
        }
        match path {
            Some(path) => Ok(CsvFileCatalogue {
                path,
                last_processed_ts: 0,
            }),
            None => Err(BgpStreamError::ConfigError(
                "csvfile interface requires the csv-file option".to_string(),
            )),
        }
    }

    pub fn refresh(
        &mut self,
        queue: &mut InputQueue,
        filters: &FilterStore,
    ) -> Result<usize, BgpStreamError> {
        // accept only rows at least one second old, so a writer still
        // appending in this very second is picked up next time
        let max_accepted_ts = (chrono::Utc::now().timestamp() - 1) as u32;
        let mut max_ts_infile = 0;
        let mut num_results = 0;

        let reader = oneio::get_reader(&self.path)
            .map_err(|e| BgpStreamError::CatalogueError(format!("cannot open {}: {e}", self.path)))?;
        for line in BufReader::new(reader).lines() {
            let line = line.map_err(BgpStreamError::IoError)?;
            if line.trim().is_empty() {
                continue;
            }
            let row = match parse_row(&line) {
                Some(row) => row,
                None => {
                    warn!("skipping malformed manifest row: {}", line);
                    continue;
                }
            };
            if row.timestamp <= self.last_processed_ts || row.timestamp > max_accepted_ts {
                continue;
            }
            if row.timestamp > max_ts_infile {
                max_ts_infile = row.timestamp;
            }
            if !row_passes(&row, filters) {
                continue;
            }
            if queue.push_sorted(row.input) {
                num_results += 1;
            }
        }

        if max_ts_infile > self.last_processed_ts {
            self.last_processed_ts = max_ts_infile;
        }
        Ok(num_results)
    }
}

struct ManifestRow {
    input: InputFile,
    timestamp: u32,
}

fn parse_row(line: &str) -> Option<ManifestRow> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 7 {
        return None;
    }
    let dump_type = DumpType::from_kind_str(fields[2])?;
    Some(ManifestRow {
        input: InputFile {
            path: fields[0].to_string(),
            project: fields[1].to_string(),
            dump_type,
            collector: fields[3].to_string(),
            file_time: fields[4].parse().ok()?,
            time_span: fields[5].parse().ok()?,
        },
        timestamp: fields[6].parse().ok()?,
    })
}

fn row_passes(row: &ManifestRow, filters: &FilterStore) -> bool {
    let input = &row.input;
    if !filters.projects().is_empty() && !filters.projects().contains(&input.project) {
        return false;
    }
    if !filters.collectors().is_empty() && !filters.collectors().contains(&input.collector) {
        return false;
    }
    if !filters.dump_types().is_empty() && !filters.dump_types().contains(&input.dump_type) {
        return false;
    }
    let intervals = filters.intervals();
    if intervals.is_empty() {
        return true;
    }
    intervals.iter().any(|i| {
        input.file_time >= i.begin.saturating_sub(FILE_TIME_MARGIN)
            && (i.is_live() || input.file_time <= i.end)
    })
}
