#![no_main]

use jasmine_bridge::Traceback;
use jasmine_bridge::tb::parse_stack;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let frames = parse_stack(s);
        if let Some(tb) = Traceback::from_stack(s) {
            assert!(tb.depth() <= frames.len());
        }
    }
});
