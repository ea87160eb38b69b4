//! bgpreader: stream BGP records/elements matching a set of filters to
//! standard output, one pipe-delimited line each.
use bgpstream::{
    catalogue, BgpStream, BgpStreamError, DumpPosition, DumpType, FilterKind, StreamRecord,
    BGPSTREAM_FOREVER,
};
use clap::Parser;
use std::io::Write;
use std::process::ExitCode;

const RECORD_FORMAT_HEADER: &str = "\
# Record format:
# <dump-type>|<dump-pos>|<record-ts>|<project>|<collector>|<status>|<dump-time>
#
# <dump-type>: R RIB, U Update
# <dump-pos>:  B begin, M middle, E end
# <status>:    V valid, E empty, F filtered, R corrupted record, S corrupted source
#";

const ELEM_FORMAT_HEADER: &str = "\
# Elem format:
# <dump-type>|<elem-type>|<record-ts>|<project>|<collector>|<peer-ASN>|<peer-IP>|\
<prefix>|<next-hop-IP>|<AS-path>|<origin-AS>|<communities>|<old-state>|<new-state>
#
# <dump-type>: R RIB, U Update
# <elem-type>: R RIB, A announcement, W withdrawal, S state message
#
# RIB control messages (signal Begin and End of RIB):
# <dump-type>|<dump-pos>|<record-ts>|<project>|<collector>
#
# <dump-pos>:  B begin, E end
#";

/// Stream time-sorted BGP measurement data.
#[derive(Parser, Debug)]
#[command(name = "bgpreader", version)]
struct Opts {
    /// Use the given data interface to find available data
    #[arg(short = 'd', default_value = "broker")]
    data_interface: String,

    /// Set a data interface option as <option-name>,<option-value>;
    /// use '-o ?' to list the options of the selected interface
    #[arg(short = 'o', value_name = "OPTION,VALUE")]
    interface_options: Vec<String>,

    /// Process records from only the given project (routeviews, ris)
    #[arg(short = 'p')]
    projects: Vec<String>,

    /// Process records from only the given collector
    #[arg(short = 'c')]
    collectors: Vec<String>,

    /// Process records with only the given type (ribs, updates)
    #[arg(short = 't')]
    types: Vec<String>,

    /// Process records within the given time window, as
    /// <start>[,<end>]; omitting the end enables live mode
    #[arg(short = 'w', value_name = "START[,END]")]
    windows: Vec<String>,

    /// Process records received in the recent interval "<num> <unit>",
    /// unit one of s, m, h, d
    #[arg(short = 'I', value_name = "INTERVAL")]
    recent_interval: Option<String>,

    /// Process at most one rib per collector every <period> seconds
    #[arg(short = 'P', value_name = "PERIOD")]
    rib_period: Option<u32>,

    /// Return valid elems originated by a specific peer ASN
    #[arg(short = 'j')]
    peer_asns: Vec<String>,

    /// Return valid elems associated with a specific prefix
    #[arg(short = 'k')]
    prefixes: Vec<String>,

    /// Return valid elems with the specified community (asn:value,
    /// the '*' metacharacter is recognized)
    #[arg(short = 'y')]
    communities: Vec<String>,

    /// Filter records and elements with a filter-string expression
    #[arg(short = 'f', value_name = "FILTERSTRING")]
    filter_string: Option<String>,

    /// Enable live mode (blocking requests for new records)
    #[arg(short = 'l')]
    live: bool,

    /// Print one line per BGP record (mostly for debugging)
    #[arg(short = 'r')]
    record_output: bool,

    /// Print valid records in bgpdump -m format
    #[arg(short = 'm')]
    bgpdump_output: bool,

    /// Print one line per element of each valid record (default)
    #[arg(short = 'e')]
    elem_output: bool,

    /// Print format information before the output
    #[arg(short = 'i')]
    print_headers: bool,
}

fn list_interface_options(interface: &str) {
    eprintln!("Data interface options for '{interface}':");
    match catalogue::data_interface_options(interface) {
        None | Some([]) => eprintln!("   [NONE]"),
        Some(options) => {
            for option in options {
                eprintln!("   {:<15}{}", option.name, option.description);
            }
        }
    }
    eprintln!();
    eprintln!("Available data interfaces:");
    for info in catalogue::data_interfaces() {
        eprintln!("   {:<15}{}", info.name, info.description);
    }
}

fn configure(stream: &mut BgpStream, opts: &Opts) -> Result<(), BgpStreamError> {
    stream.set_data_interface(&opts.data_interface)?;

    for option in &opts.interface_options {
        let (name, value) = option.split_once(',').ok_or_else(|| {
            BgpStreamError::ConfigError(format!(
                "malformed data interface option '{option}', expected <option-name>,<option-value>"
            ))
        })?;
        stream.set_data_interface_option(name, value)?;
    }

    if let Some(filter_string) = &opts.filter_string {
        stream.parse_filter_string(filter_string)?;
    }
    if let Some(interval) = &opts.recent_interval {
        stream.add_recent_interval_filter(interval, opts.live)?;
    }
    for project in &opts.projects {
        stream.add_filter(FilterKind::Project, project)?;
    }
    for collector in &opts.collectors {
        stream.add_filter(FilterKind::Collector, collector)?;
    }
    for dump_type in &opts.types {
        stream.add_filter(FilterKind::RecordType, dump_type)?;
    }
    for window in &opts.windows {
        let (start, end) = match window.split_once(',') {
            Some((start, end)) => (parse_ts(start, window)?, parse_ts(end, window)?),
            None => (parse_ts(window, window)?, BGPSTREAM_FOREVER),
        };
        stream.add_interval_filter(start, end);
    }
    for peer_asn in &opts.peer_asns {
        stream.add_filter(FilterKind::PeerAsn, peer_asn)?;
    }
    for prefix in &opts.prefixes {
        stream.add_filter(FilterKind::Prefix, prefix)?;
    }
    for community in &opts.communities {
        stream.add_filter(FilterKind::Community, community)?;
    }
    if let Some(period) = opts.rib_period {
        stream.add_rib_period_filter(period);
    }
    if opts.live {
        stream.set_live_mode();
    }
    Ok(())
}

fn parse_ts(value: &str, window: &str) -> Result<u32, BgpStreamError> {
    value
        .parse::<u32>()
        .map_err(|_| BgpStreamError::ConfigError(format!("invalid time window '{window}'")))
}

/// Writes one line; a broken pipe ends the output cleanly.
fn emit(out: &mut impl Write, line: &str) -> std::io::Result<()> {
    if let Err(e) = writeln!(out, "{line}") {
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            eprintln!("{e}");
        }
        return Err(e);
    }
    Ok(())
}

fn run(stream: &mut BgpStream, opts: &Opts, elem_output: bool) -> Result<(), BgpStreamError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut record = StreamRecord::new();

    while stream.next_record(&mut record)? {
        if opts.record_output && emit(&mut out, &record.record_line()).is_err() {
            return Ok(());
        }
        if !record.is_valid() {
            continue;
        }
        let attrs = record.attributes.clone();
        let is_rib = attrs.dump_type == Some(DumpType::Rib);
        let dump_type = attrs.dump_type.unwrap_or(DumpType::Update);

        // one pass over the generator feeds both output modes
        let mut bgpdump_lines = Vec::new();
        let mut elem_lines = Vec::new();
        while let Some(elem) = stream.next_elem(&mut record) {
            if opts.bgpdump_output {
                bgpdump_lines.push(elem.to_bgpdump_line(dump_type));
            }
            if elem_output {
                elem_lines.push(attrs.elem_line(elem));
            }
        }

        for line in bgpdump_lines {
            if emit(&mut out, &line).is_err() {
                return Ok(());
            }
        }
        if elem_output {
            if is_rib
                && record.dump_position == DumpPosition::Start
                && emit(&mut out, &record.rib_control_line()).is_err()
            {
                return Ok(());
            }
            for line in elem_lines {
                if emit(&mut out, &line).is_err() {
                    return Ok(());
                }
            }
            if is_rib
                && record.dump_position == DumpPosition::End
                && emit(&mut out, &record.rib_control_line()).is_err()
            {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let opts = Opts::parse();

    if opts.interface_options.iter().any(|o| o == "?") {
        list_interface_options(&opts.data_interface);
        return ExitCode::SUCCESS;
    }

    if opts.windows.is_empty() && opts.recent_interval.is_none() {
        if opts.data_interface == "broker" {
            eprintln!(
                "ERROR: At least one time window must be set when using the broker data interface"
            );
            return ExitCode::FAILURE;
        }
        eprintln!("WARN: No time windows specified, defaulting to all available data");
    }

    let elem_output = opts.elem_output || !(opts.record_output || opts.bgpdump_output);

    let mut stream = BgpStream::new();
    if let Err(e) = configure(&mut stream, &opts) {
        eprintln!("ERROR: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = stream.start() {
        eprintln!("ERROR: could not start stream: {e}");
        return ExitCode::FAILURE;
    }

    if opts.print_headers {
        if opts.record_output {
            println!("{RECORD_FORMAT_HEADER}");
        }
        if elem_output {
            println!("{ELEM_FORMAT_HEADER}");
        }
    }

    let result = run(&mut stream, &opts, elem_output);
    stream.stop();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}
