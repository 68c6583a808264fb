#![no_main]

//! Receive-pack bodies built from raw client bytes.
//!
//! Malformed pkt-lines, truncated pack headers, lying object counts, and
//! corrupt zlib streams must come back as errors, never as panics or
//! unbounded work.

use libfuzzer_sys::fuzz_target;

use packgate::pack::{commit_data, parse_pack, split_receive_body};

fuzz_target!(|data: &[u8]| {
    let Ok((_updates, pack)) = split_receive_body(data) else {
        return;
    };
    let Ok((_meta, objects)) = parse_pack(pack) else {
        return;
    };
    let _ = commit_data(&objects);
});
