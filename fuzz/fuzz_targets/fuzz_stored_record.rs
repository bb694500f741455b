#![no_main]

use libfuzzer_sys::fuzz_target;
use lynx_core::{BiometricKey, EncryptedRecord, FieldKey};

fuzz_target!(|data: &[u8]| {
    // A damaged store file must fail cleanly
    let Ok(record) = serde_json::from_slice::<EncryptedRecord>(data) else {
        return;
    };

    let key = FieldKey::derive(&BiometricKey::from_characteristics(data));
    if record.matches(&key) {
        let _ = record.open(&key);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = FieldKey::from_encoded(text);
    }
});
