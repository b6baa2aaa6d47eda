#![no_main]

use libfuzzer_sys::fuzz_target;
use obu_inspect::bitstream_utils::IvfIterator;
use obu_inspect::codec::av1::dispatcher::ObuDispatcher;

fuzz_target!(|data: &[u8]| {
    let mut dispatcher = ObuDispatcher::default();

    for chunk in IvfIterator::new(data) {
        let _ = dispatcher.dispatch(chunk);
    }
});
