#![no_main]

use exembellish::codec::{MsgPackCodec, UnitCodec};
use exembellish::options::AgentOptions;
use exembellish::transformer::{Embellisher, UnitTransformer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let engine = Embellisher::new(AgentOptions::all());

    // Arbitrary containers must be rejected, never panic
    let _ = engine.transform("com/acme/Fuzz", data);

    // Well-formed units with arbitrary bodies must rewrite or error cleanly
    if let Ok(unit) = MsgPackCodec.decode(data) {
        if let Ok(out) = engine.transform(&unit.name, data) {
            let _ = MsgPackCodec.decode(&out);
        }
    }
});
