#![no_main]

use libfuzzer_sys::fuzz_target;
use pulse_source::service_id_from_url;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Some(service_id) = service_id_from_url(&raw) {
        assert_eq!(service_id.len(), 7);
        assert!(service_id
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit()));
        assert!(raw.contains(&service_id));
    }
});
