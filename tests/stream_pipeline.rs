//! End-to-end pipeline tests over local manifests and dump files.
use bgpstream::{BgpStream, DumpPosition, RecordStatus, StreamRecord};
use std::io::Write;

fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

/// A csv manifest pointing at one empty dump and one undecodable dump:
/// the stream reifies both as terminal records, in file-time order,
/// each marked as the end of its source.
#[test]
fn terminal_records_come_out_in_time_order() {
    let empty_dump = temp_file(b"");
    let garbage_dump = temp_file(&[0xde, 0xad, 0xbe, 0xef].repeat(64));

    let manifest = temp_file(
        format!(
            "{},ris,updates,rrc01,500,120,50\n{},ris,updates,rrc00,100,120,50\n",
            garbage_dump.path().display(),
            empty_dump.path().display(),
        )
        .as_bytes(),
    );

    let mut stream = BgpStream::new();
    stream.set_data_interface("csvfile").unwrap();
    stream
        .set_data_interface_option("csv-file", manifest.path().to_str().unwrap())
        .unwrap();
    stream.start().unwrap();

    let mut record = StreamRecord::new();
    let mut seen = Vec::new();
    while stream.next_record(&mut record).unwrap() {
        assert_eq!(record.dump_position, DumpPosition::End);
        seen.push((
            record.attributes.collector.clone(),
            record.attributes.record_time,
            record.status,
        ));
        // terminal records expand to no elements
        assert!(stream.next_elem(&mut record).is_none());
    }

    assert_eq!(
        seen,
        vec![
            ("rrc00".to_string(), 100, Some(RecordStatus::EmptySource)),
            ("rrc01".to_string(), 500, Some(RecordStatus::CorruptedRecord)),
        ]
    );
}

/// The singlefile interface re-offers nothing on a second refresh of
/// unchanged files, so a non-live stream terminates after one pass.
#[test]
fn singlefile_stream_terminates() {
    let rib = temp_file(b"");
    let upd = temp_file(b"");

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
    let mut count = 0;
    let mut lines = Vec::new();
    while stream.next_record(&mut record).unwrap() {
        count += 1;
        lines.push(record.record_line());
    }
    assert_eq!(count, 2);
    // the rib sorts ahead of the update at the shared file time
    assert!(lines[0].starts_with('R'), "got {:?}", lines);
    assert!(lines[1].starts_with('U'), "got {:?}", lines);
    stream.stop();
}

/// Corrupted records reset the rib-period window: with a one-hour
/// period, a second rib inside the hour is admitted again after the
/// first came back corrupted.
#[test]
fn corrupted_rib_reopens_period_window() {
    let garbage_rib = temp_file(&[0xff, 0x00].repeat(128));
    let second_rib = temp_file(b"");

    let manifest = temp_file(
        format!(
            "{},ris,ribs,rrc06,1427846400,120,50\n{},ris,ribs,rrc06,1427848200,120,60\n",
            garbage_rib.path().display(),
            second_rib.path().display(),
        )
        .as_bytes(),
    );

    let mut stream = BgpStream::new();
    stream.set_data_interface("csvfile").unwrap();
    stream
        .set_data_interface_option("csv-file", manifest.path().to_str().unwrap())
        .unwrap();
    stream.add_rib_period_filter(3600);
    stream.start().unwrap();

    let mut record = StreamRecord::new();
    let mut statuses = Vec::new();
    while stream.next_record(&mut record).unwrap() {
        statuses.push(record.status);
    }
    // without the reset the second rib would have been dropped by the
    // period check and only one record would surface
    assert_eq!(
        statuses,
        vec![
            Some(RecordStatus::CorruptedRecord),
            Some(RecordStatus::EmptySource),
        ]
    );
}
