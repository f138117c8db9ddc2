#![no_main]

use libfuzzer_sys::fuzz_target;
use vmscope::trace::TraceReader;

fuzz_target!(|data: &[u8]| {
    for event in TraceReader::new(data) {
        if event.is_err() {
            break;
        }
    }
});
