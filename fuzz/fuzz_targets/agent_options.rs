#![no_main]

use exembellish::options::AgentOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing never fails; bad entries are dropped
        let options = AgentOptions::parse(Some(input));
        let _ = options.should_instrument("com.acme.Widget");
    }
});
