//! Fuzz testing for payload validation and log sanitization.
//!
//! Feeds arbitrary bytes through the JSON decoder and, for every object that
//! parses, checks that:
//!
//! - `missing_fields` never panics and only reports requested names
//! - every reported name really fails `is_present`, and every falsy scalar
//!   (`null`, `false`, zero) is reported
//! - `SensitiveFields::sanitize` never panics and keeps the key set
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use getfit_pipeline::validation::{is_present, missing_fields, SensitiveFields};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value};

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<Map<String, Value>>(data) else {
        return;
    };

    // Ask for every key present plus a few that usually are not.
    let mut required: Vec<String> = payload.keys().cloned().collect();
    required.extend(["email", "password", ""].map(String::from));

    let missing = missing_fields(&payload, &required);
    for name in &missing {
        assert!(required.contains(name));
        assert!(!is_present(payload.get(name)));
    }

    // Falsy scalars are always reported.
    for (name, value) in &payload {
        let falsy = matches!(value, Value::Bool(false) | Value::Null)
            || value.as_f64() == Some(0.0);
        if falsy {
            assert!(missing.contains(name));
        }
    }

    let clean = SensitiveFields::default().sanitize(&payload);
    assert_eq!(clean.len(), payload.len());
    assert!(clean.keys().eq(payload.keys()));
});
