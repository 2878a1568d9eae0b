#![no_main]

use std::sync::Arc;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use openwire_gateway::detecting::{builtin_signatures, DetectionStatus, ProtocolDetector};

fuzz_target!(|data: &[u8]| {
    let Ok(signatures) = builtin_signatures() else {
        return;
    };
    let mut detector = ProtocolDetector::new(signatures.into(), 256, Duration::from_secs(5));
    for chunk in data.chunks(7) {
        match detector.supply(chunk) {
            Ok(DetectionStatus::NeedMoreData) => continue,
            Ok(DetectionStatus::Matched(_)) => {
                let _ = detector.take_buffered();
                break;
            }
            _ => break,
        }
    }
});
