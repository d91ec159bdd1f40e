#![no_main]

use libfuzzer_sys::fuzz_target;
use pulse_types::{incident_offset, parse_api_timestamp, timestamp_to_text};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(parsed) = parse_api_timestamp(&raw) else {
        return;
    };
    assert_eq!(*parsed.offset(), incident_offset());
    let text = timestamp_to_text(parsed);
    let date = parsed.date_naive().format("%Y-%m-%d").to_string();
    if date.len() == 10 {
        assert!(text.starts_with(&date));
    }
    let reparsed = parse_api_timestamp(&text).expect("rendered timestamp must parse");
    assert_eq!(reparsed.timestamp(), parsed.timestamp());
});
