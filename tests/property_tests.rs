//! Property-based tests using proptest
//!
//! These tests check codec and detection invariants across randomly
//! generated commands, byte streams and chunkings.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::Decoder;

use openwire_gateway::core::{BooleanStream, DataInput, DataOutput};
use openwire_gateway::detecting::{
    builtin_signatures, DetectionStatus, ProtocolDetector, Signature, Verdict,
};
use openwire_gateway::openwire::command::*;
use openwire_gateway::openwire::{OpenWireCodec, OpenWireFormat, WireOptions};

fn opt_string() -> impl Strategy<Value = Option<String>> {
    prop::option::of(".{0,40}")
}

fn base_command() -> impl Strategy<Value = BaseCommand> {
    (any::<i32>(), any::<bool>()).prop_map(|(command_id, response_required)| BaseCommand {
        command_id,
        response_required,
    })
}

fn command() -> impl Strategy<Value = DataStructure> {
    prop_oneof![
        base_command().prop_map(|base| KeepAliveInfo { base }.into()),
        (base_command(), any::<i32>()).prop_map(|(base, correlation_id)| Response {
            base,
            correlation_id
        }
        .into()),
        (opt_string(), any::<i64>(), any::<i64>()).prop_map(|(connection_id, session_id, value)| {
            ConsumerId {
                connection_id,
                session_id,
                value,
            }
            .into()
        }),
        (base_command(), opt_string(), opt_string(), any::<bool>()).prop_map(
            |(base, client_id, user_name, manageable)| ConnectionInfo {
                base,
                connection_id: Some(DataStructure::from(ConnectionId::new("ID:prop")).shared()),
                client_id,
                user_name,
                manageable,
                ..ConnectionInfo::default()
            }
            .into()
        ),
        (base_command(), any::<i32>(), opt_string(), opt_string()).prop_map(
            |(base, correlation_id, class, message)| ExceptionResponse {
                base,
                correlation_id,
                exception: Some(BrokerError {
                    exception_class: class,
                    message,
                    ..BrokerError::default()
                }),
            }
            .into()
        ),
        opt_string().prop_map(|physical_name| Topic { physical_name }.into()),
    ]
}

fn wire_options() -> impl Strategy<Value = WireOptions> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(tight, cache, stack)| WireOptions {
        tight_encoding: tight,
        cache_enabled: cache,
        stack_trace_enabled: stack,
        ..WireOptions::default()
    })
}

// Property: bits come back in write order and reading past them underruns
proptest! {
    #[test]
    fn prop_boolean_stream_preserves_bits(bits in prop::collection::vec(any::<bool>(), 0..4000)) {
        let mut bs = BooleanStream::new();
        for bit in &bits {
            bs.write_boolean(*bit).unwrap();
        }
        let mut out = DataOutput::new();
        bs.marshal(&mut out);
        prop_assert_eq!(out.len(), bs.marshalled_size());

        let bytes = out.freeze();
        let mut input = DataInput::new(&bytes);
        let mut read = BooleanStream::unmarshal(&mut input).unwrap();
        prop_assert!(!input.has_remaining());
        for bit in &bits {
            prop_assert_eq!(read.read_boolean().unwrap(), *bit);
        }
        // padding up to the byte boundary reads as false
        while read.bits_read() % 8 != 0 {
            prop_assert!(!read.read_boolean().unwrap());
        }
        prop_assert!(read.read_boolean().is_err());
    }
}

// Property: a decoded command equals the command that was marshalled
proptest! {
    #[test]
    fn prop_marshal_unmarshal_identity(opts in wire_options(), cmds in prop::collection::vec(command(), 1..8)) {
        let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
        let mut decoder = OpenWireFormat::new(opts).unwrap();
        for cmd in cmds {
            let frame = encoder.marshal(&cmd).unwrap();
            prop_assert_eq!(decoder.unmarshal(&frame).unwrap(), cmd);
        }
    }
}

// Property: marshalling is deterministic for a fresh session
proptest! {
    #[test]
    fn prop_marshal_deterministic(opts in wire_options(), cmd in command()) {
        let a = OpenWireFormat::new(opts.clone()).unwrap().marshal(&cmd).unwrap();
        let b = OpenWireFormat::new(opts).unwrap().marshal(&cmd).unwrap();
        prop_assert_eq!(a, b);
    }
}

// Property: arbitrary input never panics the decoder
proptest! {
    #[test]
    fn prop_unmarshal_arbitrary_bytes(opts in wire_options(), data in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut wf = OpenWireFormat::new(opts).unwrap();
        let _ = wf.unmarshal(&data);
    }
}

// Property: the stream codec yields the same commands however the bytes are cut
proptest! {
    #[test]
    fn prop_codec_chunking_invariant(
        opts in wire_options(),
        cmds in prop::collection::vec(command(), 1..6),
        cuts in prop::collection::vec(1usize..64, 0..32),
    ) {
        let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
        let mut stream = Vec::new();
        for cmd in &cmds {
            stream.extend_from_slice(&encoder.marshal(cmd).unwrap());
        }

        let mut whole = OpenWireCodec::new(OpenWireFormat::new(opts.clone()).unwrap());
        let mut buf = BytesMut::from(&stream[..]);
        let mut expected = Vec::new();
        while let Some(cmd) = whole.decode(&mut buf).unwrap() {
            expected.push(cmd);
        }

        let mut chunked = OpenWireCodec::new(OpenWireFormat::new(opts).unwrap());
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut rest = &stream[..];
        let mut cuts = cuts.into_iter();
        while !rest.is_empty() {
            let n = cuts.next().unwrap_or(rest.len()).min(rest.len());
            buf.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            while let Some(cmd) = chunked.decode(&mut buf).unwrap() {
                decoded.push(cmd);
            }
        }
        prop_assert_eq!(decoded, expected);
        prop_assert_eq!(whole.format().options(), chunked.format().options());
    }
}

// Property: the detection verdict does not depend on how the prologue is chunked
proptest! {
    #[test]
    fn prop_detection_chunking_invariant(
        prologue in prop::collection::vec(any::<u8>(), 0..64),
        cuts in prop::collection::vec(1usize..8, 0..16),
    ) {
        let signatures: Arc<[Signature]> = builtin_signatures().unwrap().into();
        // with two matching signatures the winner depends on arrival
        let matching = signatures
            .iter()
            .filter(|s| s.check(&prologue) == Verdict::Match)
            .count();
        prop_assume!(matching <= 1);
        let mut whole = ProtocolDetector::new(Arc::clone(&signatures), 4096, Duration::from_secs(5));
        let expected = whole.supply(&prologue).unwrap();

        let mut chunked = ProtocolDetector::new(signatures, 4096, Duration::from_secs(5));
        let mut status = DetectionStatus::NeedMoreData;
        let mut rest = &prologue[..];
        let mut cuts = cuts.into_iter();
        while !rest.is_empty() && status == DetectionStatus::NeedMoreData {
            let n = cuts.next().unwrap_or(rest.len()).min(rest.len());
            status = chunked.supply(&rest[..n]).unwrap();
            rest = &rest[n..];
        }
        // a chunked stream may decide on a shorter prefix, but never differently
        match (&expected, &status) {
            (DetectionStatus::NeedMoreData, s) => prop_assert_eq!(s, &DetectionStatus::NeedMoreData),
            (DetectionStatus::Exhausted(_), DetectionStatus::Exhausted(_)) => {}
            (DetectionStatus::Matched(a), DetectionStatus::Matched(b)) => prop_assert_eq!(a, b),
            (e, s) => prop_assert!(false, "whole {:?} vs chunked {:?}", e, s),
        }
    }
}
