#![no_main]

use constellation_core::signature::AdmissionPayload;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must re-encode to exactly the input.
    if let Ok(payload) = AdmissionPayload::decode(data) {
        assert_eq!(payload.canonical_bytes(), data);
        let again = AdmissionPayload::decode(&payload.canonical_bytes()).expect("re-decode");
        assert_eq!(again, payload);
    }
});
