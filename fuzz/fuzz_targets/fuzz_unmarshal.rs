#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use openwire_gateway::openwire::{OpenWireCodec, OpenWireFormat, WireOptions};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    // first byte picks the encoding mode
    let opts = WireOptions {
        tight_encoding: data[0] & 1 != 0,
        cache_enabled: data[0] & 2 != 0,
        stack_trace_enabled: data[0] & 4 != 0,
        ..WireOptions::default()
    };
    let body = &data[1..];

    if let Ok(mut wf) = OpenWireFormat::new(opts.clone()) {
        if let Ok(command) = wf.unmarshal(body) {
            // whatever decodes must encode again
            let mut again = OpenWireFormat::new(opts.clone()).unwrap();
            let _ = again.marshal(&command);
        }
    }

    if let Ok(format) = OpenWireFormat::new(opts) {
        let mut codec = OpenWireCodec::new(format);
        let mut buf = BytesMut::from(body);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
    }
});
