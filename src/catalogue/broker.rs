/*!
The broker catalogue: asks the BGPStream broker service which dump
files cover the configured filters.

The query URL is built once from the filter store. From the second
refresh on, two incremental parameters are added: `dataAddedSince`
(the `time` of the last committed response, so the broker skips files
it already reported) and `minInitialTime` (the right edge of the data
window seen so far, so the broker skips files entirely before it).

Transient failures (transport errors, truncated or schema-violating
responses, broker-side error reports) are retried forever with an
exponential backoff capped at 15 minutes; the stream is designed to
ride out broker outages. Only a syntactically broken response body is
treated as a protocol bug and surfaced as fatal.
*/
use crate::error::BgpStreamError;
use crate::filter::FilterStore;
use crate::input::{InputFile, InputQueue};
use crate::models::{DumpType, BGPSTREAM_FOREVER};
use log::{debug, info, warn};
use serde::Deserialize;
use std::io::Read;
use std::thread;
use std::time::Duration;

const DEFAULT_BROKER_URL: &str = "https://bgpstream.caida.org/broker";

/// Max seconds to wait between broker retries.
const MAX_WAIT_TIME: u64 = 900;

#[derive(Debug, Deserialize)]
struct BrokerResponse {
    time: u32,
    #[serde(rename = "type")]
    response_type: String,
    #[serde(default)]
    error: Option<String>,
    // opaque echo of the request, ignored
    #[serde(rename = "queryParameters", default)]
    _query_parameters: serde_json::Value,
    data: BrokerData,
}

#[derive(Debug, Deserialize)]
struct BrokerData {
    #[serde(rename = "dumpFiles")]
    dump_files: Vec<BrokerDumpFile>,
}

#[derive(Debug, Deserialize)]
struct BrokerDumpFile {
    #[serde(rename = "urlType")]
    url_type: String,
    url: String,
    project: String,
    collector: String,
    #[serde(rename = "type")]
    dump_type: String,
    #[serde(rename = "initialTime")]
    initial_time: u32,
    duration: u32,
}

enum FetchError {
    /// Worth retrying with backoff.
    Transient(String),
    /// A protocol bug; retrying cannot help.
    Fatal(String),
}

/// A fully validated response, staged as queue-ready inputs so the
/// commit step cannot fail halfway through.
struct ParsedResponse {
    time: u32,
    files: Vec<InputFile>,
}

pub struct BrokerCatalogue {
    /// The query URL with all fixed parameters; per-refresh parameters
    /// are appended to a copy.
    query_url: String,
    /// `time` of the last response we committed.
    last_response_time: u32,
    /// max(initialTime + duration) over every file seen.
    current_window_end: u32,
}

impl BrokerCatalogue {
    pub fn new(options: &[(String, String)], filters: &FilterStore) -> BrokerCatalogue {
        let mut base_url = DEFAULT_BROKER_URL.to_string();
        let mut params: Vec<String> = Vec::new();
        for (option, value) in options {
            match option.as_str() {
                "url" => base_url = value.clone(),
                "param" => params.push(value.clone()),
                _ => {}
            }
        }
        BrokerCatalogue {
            query_url: build_query_url(&base_url, &params, filters),
            last_response_time: 0,
            current_window_end: 0,
        }
    }

    pub fn refresh(&mut self, queue: &mut InputQueue) -> Result<usize, BgpStreamError> {
        let mut url = self.query_url.clone();
        if self.last_response_time > 0 {
            append_param(
                &mut url,
                &format!("dataAddedSince={}", self.last_response_time),
            );
        }
        if self.current_window_end > 0 {
            append_param(
                &mut url,
                &format!("minInitialTime={}", self.current_window_end),
            );
        }

        let mut wait_time = 1u64;
        loop {
            debug!("broker query: {}", url);
            match fetch_response(&url) {
                Ok(response) => return Ok(self.commit(response, queue)),
                Err(FetchError::Fatal(reason)) => {
                    return Err(BgpStreamError::BrokerError(reason));
                }
                Err(FetchError::Transient(reason)) => {
                    warn!(
                        "broker request failed ({}), waiting {}s before retry",
                        reason, wait_time
                    );
                    thread::sleep(Duration::from_secs(wait_time));
                    if wait_time < MAX_WAIT_TIME {
                        wait_time = (wait_time * 2).min(MAX_WAIT_TIME);
                    }
                }
            }
        }
    }

    /// Pushes a fully parsed response into the queue and only then
    /// advances the incremental-query state, so a half-read response
    /// can never make the next query skip data.
    fn commit(&mut self, response: ParsedResponse, queue: &mut InputQueue) -> usize {
        let mut num_results = 0;
        for file in response.files {
            let window_end = file.file_time.saturating_add(file.time_span);
            if window_end > self.current_window_end {
                self.current_window_end = window_end;
            }
            // a file refused as a duplicate is already known, not an error
            if queue.push_sorted(file) {
                num_results += 1;
            }
        }
        self.last_response_time = response.time;
        info!("broker returned {} new dump file(s)", num_results);
        num_results
    }
}

fn append_param(url: &mut String, param: &str) {
    if url.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(param);
}

/// Builds `base/data` plus the filter parameters:
/// `projects[]=`, `collectors[]=`, `types[]=`, any opaque user params,
/// and one `intervals[]=begin,end` per time window.
fn build_query_url(base_url: &str, params: &[String], filters: &FilterStore) -> String {
    let mut url = format!("{}/data", base_url.trim_end_matches('/'));
    let mut projects: Vec<&String> = filters.projects().iter().collect();
    projects.sort();
    for project in projects {
        append_param(&mut url, &format!("projects[]={project}"));
    }
    let mut collectors: Vec<&String> = filters.collectors().iter().collect();
    collectors.sort();
    for collector in collectors {
        append_param(&mut url, &format!("collectors[]={collector}"));
    }
    let mut types: Vec<&str> = filters.dump_types().iter().map(|t| t.as_kind_str()).collect();
    types.sort();
    for dump_type in types {
        append_param(&mut url, &format!("types[]={dump_type}"));
    }
    for param in params {
        append_param(&mut url, param);
    }
    for interval in filters.intervals() {
        // a live interval is sent with the sentinel end, as the broker
        // expects
        let end = if interval.is_live() {
            BGPSTREAM_FOREVER
        } else {
            interval.end
        };
        append_param(&mut url, &format!("intervals[]={},{}", interval.begin, end));
    }
    url
}

fn fetch_response(url: &str) -> Result<ParsedResponse, FetchError> {
    let mut reader =
        oneio::get_reader(url).map_err(|e| FetchError::Transient(format!("open failed: {e}")))?;
    let mut body = String::new();
    reader
        .read_to_string(&mut body)
        .map_err(|e| FetchError::Transient(format!("read failed: {e}")))?;
    parse_response(&body)
}

/// Classifies parse problems: a body that is not JSON at all indicates
/// a protocol bug (fatal); a well-formed body with missing fields or a
/// broker-reported error is retried.
fn parse_response(body: &str) -> Result<ParsedResponse, FetchError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Fatal(format!("invalid JSON from broker: {e}")))?;
    let response: BrokerResponse = serde_json::from_value(value)
        .map_err(|e| FetchError::Transient(format!("invalid broker response: {e}")))?;
    if let Some(error) = &response.error {
        return Err(FetchError::Transient(format!(
            "broker reported an error: {error}"
        )));
    }
    if response.response_type != "data" {
        return Err(FetchError::Transient(format!(
            "unexpected response type '{}'",
            response.response_type
        )));
    }

    let mut files = Vec::with_capacity(response.data.dump_files.len());
    for file in response.data.dump_files {
        if file.url_type != "simple" {
            return Err(FetchError::Transient(format!(
                "unsupported URL type '{}'",
                file.url_type
            )));
        }
        if file.url.is_empty() || file.project.is_empty() || file.collector.is_empty() {
            return Err(FetchError::Transient("invalid dumpFile record".to_string()));
        }
        let dump_type = DumpType::from_kind_str(&file.dump_type).ok_or_else(|| {
            FetchError::Transient(format!("unknown dump type '{}'", file.dump_type))
        })?;
        files.push(InputFile {
            path: file.url,
            project: file.project,
            collector: file.collector,
            dump_type,
            file_time: file.initial_time,
            time_span: file.duration,
        });
    }
    Ok(ParsedResponse {
        time: response.time,
        files,
    })
}
