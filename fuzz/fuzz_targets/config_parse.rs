#![no_main]

use libfuzzer_sys::fuzz_target;
use pulse_orchestrator::PulseConfig;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(config) = PulseConfig::from_toml_str(&raw) else {
        return;
    };
    if config.validate().is_err() {
        return;
    }
    assert!(config.orchestrator_config().batch_size > 0);
    if let Ok(directory) = config.service_directory() {
        assert!(!directory.is_empty());
        for service_id in directory.ids() {
            assert!(!service_id.trim().is_empty());
        }
    }
    if let Ok(token) = config.resolve_token(None) {
        assert_eq!(token, token.trim());
        assert!(!token.is_empty());
    }
});
