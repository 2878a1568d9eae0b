//! OpenWire marshalling of every supported data structure in every encoding

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use openwire_gateway::error::{constants, ProtocolError};
use openwire_gateway::openwire::cache::CACHE_FREE_SPACE;
use openwire_gateway::openwire::command::*;
use openwire_gateway::openwire::primitive_map::{PrimitiveMap, PrimitiveValue};
use openwire_gateway::openwire::{OpenWireFormat, Registry, WireOptions};

fn options(tight: bool, cache: bool) -> WireOptions {
    WireOptions {
        tight_encoding: tight,
        cache_enabled: cache,
        stack_trace_enabled: true,
        ..WireOptions::default()
    }
}

fn modes() -> Vec<(&'static str, WireOptions)> {
    vec![
        ("loose", options(false, false)),
        ("loose+cache", options(false, true)),
        ("tight", options(true, false)),
        ("tight+cache", options(true, true)),
    ]
}

fn base(command_id: i32) -> BaseCommand {
    BaseCommand {
        command_id,
        response_required: command_id % 2 == 0,
    }
}

fn broker_error() -> BrokerError {
    BrokerError {
        exception_class: Some("javax.jms.JMSSecurityException".to_string()),
        message: Some("User name [guest] or password is invalid.".to_string()),
        stack_trace: vec![
            StackTraceElement {
                class_name: Some("org.apache.activemq.security.JaasAuthenticationBroker".into()),
                method_name: Some("addConnection".into()),
                file_name: Some("JaasAuthenticationBroker.java".into()),
                line_number: 83,
            },
            StackTraceElement {
                class_name: Some("org.apache.activemq.broker.TransportConnection".into()),
                method_name: None,
                file_name: None,
                line_number: -1,
            },
        ],
        cause: Some(Box::new(BrokerError::new(
            "javax.security.auth.login.FailedLoginException",
            "Password does not match",
        ))),
    }
}

fn samples() -> Vec<DataStructure> {
    let conn = DataStructure::from(ConnectionId::new("ID:client-4711-1")).shared();
    let tx = DataStructure::from(LocalTransactionId {
        value: i64::from(i32::MAX) + 7,
        connection_id: Some(Arc::clone(&conn)),
    })
    .shared();

    let mut properties = PrimitiveMap::new();
    properties.insert("CacheEnabled".into(), PrimitiveValue::Boolean(true));
    properties.insert("CacheSize".into(), PrimitiveValue::Int(1024));
    properties.insert("MaxFrameSize".into(), PrimitiveValue::Long(104_857_600));
    properties.insert("Host".into(), PrimitiveValue::String("broker-1".into()));

    vec![
        WireFormatInfo {
            magic: OPENWIRE_MAGIC,
            version: 1,
            properties: Some(properties),
        }
        .into(),
        ConnectionInfo {
            base: base(1),
            connection_id: Some(Arc::clone(&conn)),
            client_id: Some("orders-service".into()),
            password: Some("s3cret".into()),
            user_name: Some("system".into()),
            broker_path: Some(vec![
                BrokerId {
                    value: Some("ID:broker-a".into()),
                },
                BrokerId { value: None },
            ]),
            broker_master_connector: false,
            manageable: true,
        }
        .into(),
        SessionInfo {
            base: base(2),
            session_id: Some(
                DataStructure::from(SessionId {
                    connection_id: Some("ID:client-4711-1".into()),
                    value: 1,
                })
                .shared(),
            ),
        }
        .into(),
        ProducerInfo {
            base: base(3),
            producer_id: Some(
                DataStructure::from(ProducerId {
                    connection_id: Some("ID:client-4711-1".into()),
                    value: -3,
                    session_id: 1,
                })
                .shared(),
            ),
            destination: Some(DataStructure::from(Queue::new("orders.inbound")).shared()),
            broker_path: None,
        }
        .into(),
        TransactionInfo {
            base: base(4),
            connection_id: Some(Arc::clone(&conn)),
            transaction_id: Some(Arc::clone(&tx)),
            transaction_type: transaction_type::BEGIN,
        }
        .into(),
        KeepAliveInfo { base: base(5) }.into(),
        ShutdownInfo { base: base(6) }.into(),
        RemoveInfo {
            base: base(7),
            object_id: Some(
                DataStructure::from(ConsumerId {
                    connection_id: Some("ID:client-4711-1".into()),
                    session_id: 1,
                    value: i64::MIN,
                })
                .shared(),
            ),
        }
        .into(),
        ConnectionError {
            base: base(8),
            exception: Some(broker_error()),
            connection_id: Some(ConnectionId::new("ID:client-4711-1")),
        }
        .into(),
        Response {
            base: base(9),
            correlation_id: 4,
        }
        .into(),
        ExceptionResponse {
            base: base(10),
            correlation_id: 1,
            exception: Some(broker_error()),
        }
        .into(),
        Queue::new("orders.inbound").into(),
        Topic::new("prices.>").into(),
        TempQueue::new("ID:client-4711-1:1:1").into(),
        TempTopic::new("ID:client-4711-1:1:2").into(),
        LocalTransactionId {
            value: 0,
            connection_id: None,
        }
        .into(),
        ConnectionId::new("ID:client-4711-1").into(),
        SessionId::default().into(),
        ConsumerId::default().into(),
        ProducerId::default().into(),
        BrokerId {
            value: Some("ID:broker-a".into()),
        }
        .into(),
    ]
}

#[test]
fn test_every_structure_in_every_mode() {
    for (mode, opts) in modes() {
        let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
        let mut decoder = OpenWireFormat::new(opts).unwrap();
        for sample in samples() {
            let frame = encoder
                .marshal(&sample)
                .unwrap_or_else(|e| panic!("{mode}: marshal {}: {e}", sample.name()));
            let decoded = decoder
                .unmarshal(&frame)
                .unwrap_or_else(|e| panic!("{mode}: unmarshal {}: {e}", sample.name()));
            assert_eq!(decoded, sample, "{mode}: {}", sample.name());
        }
    }
}

#[test]
fn test_registry_covers_the_samples() {
    let mut codes: Vec<u8> = samples().iter().map(DataStructure::data_structure_type).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), samples().len(), "one sample per type code");
    let registered: Vec<u8> = Registry::for_version(1).unwrap().type_codes().collect();
    assert_eq!(codes, registered);
}

#[test]
fn test_default_and_populated_instances_of_every_type() {
    let registry = Registry::for_version(1).unwrap();
    let defaults: Vec<DataStructure> = registry
        .type_codes()
        .map(|code| registry.get(code).unwrap().create_object())
        .collect();
    assert_eq!(defaults.len(), samples().len());

    for (mode, opts) in modes() {
        for sample in defaults.iter().cloned().chain(samples()) {
            // fresh sessions so each instance is encoded in full
            let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
            let mut decoder = OpenWireFormat::new(opts.clone()).unwrap();
            let frame = encoder
                .marshal(&sample)
                .unwrap_or_else(|e| panic!("{mode}: marshal {}: {e}", sample.name()));
            let decoded = decoder
                .unmarshal(&frame)
                .unwrap_or_else(|e| panic!("{mode}: unmarshal {}: {e}", sample.name()));
            assert_eq!(decoded, sample, "{mode}: {}", sample.name());
        }
    }
}

#[test]
fn test_tight_frame_with_unused_presence_bytes_is_refused() {
    let mut wf = OpenWireFormat::new(options(true, false)).unwrap();
    let frame = wf.marshal(&KeepAliveInfo::default().into()).unwrap().to_vec();
    // size, type, bs len = 1, one bit, command id
    assert_eq!(frame[5], 1);
    let mut padded = frame[..5].to_vec();
    padded.push(2);
    padded.push(frame[6]);
    padded.push(0);
    padded.extend_from_slice(&frame[7..]);
    let size = (padded.len() - 4) as i32;
    padded[..4].copy_from_slice(&size.to_be_bytes());

    assert!(matches!(
        wf.unmarshal(&padded),
        Err(ProtocolError::InvalidData(constants::ERR_UNREAD_PRESENCE_BITS))
    ));
}

#[test]
fn test_size_prefix_matches_frame_length() {
    for (mode, opts) in modes() {
        let mut wf = OpenWireFormat::new(opts).unwrap();
        for sample in samples() {
            let frame = wf.marshal(&sample).unwrap();
            let declared = i32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
            assert_eq!(declared as usize + 4, frame.len(), "{mode}: {}", sample.name());
            assert_eq!(frame[4], sample.data_structure_type());
        }
    }
}

#[test]
fn test_tight_is_smaller_than_loose() {
    let sample = &samples()[1];
    let loose = OpenWireFormat::new(options(false, false))
        .unwrap()
        .marshal(sample)
        .unwrap();
    let tight = OpenWireFormat::new(options(true, false))
        .unwrap()
        .marshal(sample)
        .unwrap();
    assert!(tight.len() < loose.len());
}

#[test]
fn test_stack_traces_are_dropped_when_disabled() {
    let opts = WireOptions {
        stack_trace_enabled: false,
        ..options(true, false)
    };
    let mut wf = OpenWireFormat::new(opts).unwrap();
    let sent = ExceptionResponse {
        base: base(1),
        correlation_id: 3,
        exception: Some(broker_error()),
    };
    let frame = wf.marshal(&sent.clone().into()).unwrap();
    let DataStructure::ExceptionResponse(received) = wf.unmarshal(&frame).unwrap() else {
        panic!("expected exception response");
    };
    let error = received.exception.unwrap();
    assert_eq!(error.message, sent.exception.unwrap().message);
    assert!(error.stack_trace.is_empty());
    assert!(error.cause.is_none());
}

#[test]
fn test_cached_structures_keep_identity_across_frames() {
    for (mode, opts) in modes().into_iter().filter(|(_, o)| o.cache_enabled) {
        let destination = DataStructure::from(Topic::new("prices.eur")).shared();
        let producer = |id: i32| -> DataStructure {
            ProducerInfo {
                base: base(id),
                producer_id: None,
                destination: Some(Arc::clone(&destination)),
                broker_path: None,
            }
            .into()
        };

        let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
        let mut decoder = OpenWireFormat::new(opts).unwrap();
        let first = encoder.marshal(&producer(1)).unwrap();
        let second = encoder.marshal(&producer(2)).unwrap();
        assert!(second.len() < first.len(), "{mode}: second frame uses the cache");

        let a = decoder.unmarshal(&first).unwrap();
        let b = decoder.unmarshal(&second).unwrap();
        assert_eq!(b, producer(2));
        let (DataStructure::ProducerInfo(a), DataStructure::ProducerInfo(b)) = (a, b) else {
            panic!("{mode}: expected producer info");
        };
        assert!(Arc::ptr_eq(&a.destination.unwrap(), &b.destination.unwrap()));
    }
}

fn session_info(command_id: i32, session_id: &StructureRef) -> DataStructure {
    SessionInfo {
        base: base(command_id),
        session_id: Some(Arc::clone(session_id)),
    }
    .into()
}

fn session_ids(count: usize) -> Vec<StructureRef> {
    (0..count)
        .map(|i| {
            DataStructure::from(SessionId {
                connection_id: Some("ID:c".into()),
                value: i as i64,
            })
            .shared()
        })
        .collect()
}

/// Full-encoding flag and cache index of a loose SessionInfo frame
fn cache_slot(frame: &[u8]) -> (bool, i16) {
    // size, type, command id, response flag
    (frame[10] == 1, i16::from_be_bytes([frame[11], frame[12]]))
}

fn decoded_session_id(decoder: &mut OpenWireFormat, frame: &[u8]) -> StructureRef {
    match decoder.unmarshal(frame).unwrap() {
        DataStructure::SessionInfo(info) => info.session_id.expect("session id present"),
        other => panic!("expected session info, got {}", other.name()),
    }
}

#[test]
fn test_repeats_are_sent_as_indices_and_decode_to_shared_instances() {
    let ids = session_ids(5);
    let order = [0usize, 1, 0, 2, 1, 3, 4, 0, 4, 2, 3, 3, 1, 0, 4];
    let mut encoder = OpenWireFormat::new(options(false, true)).unwrap();
    let mut decoder = OpenWireFormat::new(options(false, true)).unwrap();

    let mut full = 0;
    let mut decoded = Vec::new();
    for (n, &which) in order.iter().enumerate() {
        let frame = encoder.marshal(&session_info(n as i32, &ids[which])).unwrap();
        let (is_full, index) = cache_slot(&frame);
        if is_full {
            full += 1;
        }
        // first visits happen in source order, so slot and source coincide
        assert_eq!(index, which as i16, "frame {n}");
        decoded.push(decoded_session_id(&mut decoder, &frame));
    }
    assert_eq!(full, ids.len());
    assert_eq!(order.len() - full, 10);

    for (i, a) in decoded.iter().enumerate() {
        assert_eq!(a.as_ref(), ids[order[i]].as_ref());
        for (j, b) in decoded.iter().enumerate() {
            assert_eq!(Arc::ptr_eq(a, b), order[i] == order[j], "frames {i} and {j}");
        }
    }
}

#[test]
fn test_cache_indices_stay_in_step_through_eviction_and_wrap() {
    let capacity = CACHE_FREE_SPACE + 4;
    let ids = session_ids(capacity + 46);
    let opts = WireOptions {
        cache_size: capacity,
        ..options(false, true)
    };
    let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
    let mut decoder = OpenWireFormat::new(opts).unwrap();

    let (mut full, mut references) = (0, 0);
    for (k, id) in ids.iter().enumerate() {
        let first = encoder.marshal(&session_info(1, id)).unwrap();
        let again = encoder.marshal(&session_info(2, id)).unwrap();
        assert_eq!(cache_slot(&first), (true, (k % capacity) as i16), "object {k}");
        assert_eq!(cache_slot(&again), (false, (k % capacity) as i16), "object {k}");
        full += 1;
        references += 1;

        let a = decoded_session_id(&mut decoder, &first);
        let b = decoded_session_id(&mut decoder, &again);
        assert!(Arc::ptr_eq(&a, &b), "object {k}");
    }

    // long since evicted: sent in full again at the next free slot
    let frame = encoder.marshal(&session_info(3, &ids[0])).unwrap();
    assert_eq!(cache_slot(&frame), (true, (ids.len() % capacity) as i16));
    full += 1;
    assert_eq!(decoded_session_id(&mut decoder, &frame).as_ref(), ids[0].as_ref());
    assert_eq!((full, references), (ids.len() + 1, ids.len()));
}

#[test]
fn test_tight_cache_survives_eviction_wrap() {
    let capacity = CACHE_FREE_SPACE + 4;
    let ids = session_ids(capacity * 2);
    let opts = WireOptions {
        cache_size: capacity,
        ..options(true, true)
    };
    let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
    let mut decoder = OpenWireFormat::new(opts).unwrap();
    for (k, id) in ids.iter().enumerate() {
        let first = encoder.marshal(&session_info(1, id)).unwrap();
        let again = encoder.marshal(&session_info(2, id)).unwrap();
        assert!(again.len() < first.len(), "object {k}");
        let a = decoded_session_id(&mut decoder, &first);
        let b = decoded_session_id(&mut decoder, &again);
        assert!(Arc::ptr_eq(&a, &b), "object {k}");
        assert_eq!(a.as_ref(), id.as_ref());
    }
}

#[test]
fn test_equal_values_in_distinct_instances_cache_separately() {
    let mut wf = OpenWireFormat::new(options(true, true)).unwrap();
    let session = |id: i32| -> DataStructure {
        SessionInfo {
            base: base(id),
            session_id: Some(DataStructure::from(SessionId::default()).shared()),
        }
        .into()
    };
    let first = wf.marshal(&session(1)).unwrap();
    let second = wf.marshal(&session(1)).unwrap();
    assert_eq!(first.len(), second.len());
}

#[test]
fn test_decoder_missing_a_frame_desyncs() {
    let conn = DataStructure::from(ConnectionId::new("ID:c")).shared();
    let info = |id: i32| -> DataStructure {
        ConnectionInfo {
            base: base(id),
            connection_id: Some(Arc::clone(&conn)),
            ..ConnectionInfo::default()
        }
        .into()
    };
    let mut encoder = OpenWireFormat::new(options(false, true)).unwrap();
    let _lost = encoder.marshal(&info(1)).unwrap();
    let second = encoder.marshal(&info(2)).unwrap();

    let mut decoder = OpenWireFormat::new(options(false, true)).unwrap();
    let err = decoder.unmarshal(&second).unwrap_err();
    assert!(matches!(err, ProtocolError::CacheDesync(0)), "{err}");
}

#[test]
fn test_wrong_kind_in_cached_field_is_not_encoded() {
    // a ConnectionInfo whose connection id slot carries a queue
    let bogus: DataStructure = ConnectionInfo {
        base: base(1),
        connection_id: Some(DataStructure::from(Queue::new("not-an-id")).shared()),
        ..ConnectionInfo::default()
    }
    .into();
    for (mode, opts) in modes() {
        let mut wf = OpenWireFormat::new(opts).unwrap();
        let err = wf.marshal(&bogus).unwrap_err();
        assert!(
            matches!(
                err,
                ProtocolError::UnexpectedType {
                    expected: "ConnectionId",
                    found: 100
                }
            ),
            "{mode}: {err}"
        );
    }
}

#[test]
fn test_wrong_kind_in_cached_field_is_not_decoded() {
    // loose ConnectionInfo built by hand with a Queue in the connection id slot
    let mut body = vec![3u8, 0, 0, 0, 1, 0];
    body.extend_from_slice(&[1, 100, 1, 0, 1, b'q']);
    body.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    let mut frame = (body.len() as i32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);

    let mut wf = OpenWireFormat::new(options(false, false)).unwrap();
    assert!(matches!(
        wf.unmarshal(&frame),
        Err(ProtocolError::UnexpectedType {
            expected: "ConnectionId",
            found: 100
        })
    ));
}

/// An exception response whose error chain holds `chain` errors
fn error_chain(chain: usize) -> DataStructure {
    let mut error = BrokerError::new("java.lang.Exception", "root");
    for depth in 1..chain {
        error = BrokerError {
            cause: Some(Box::new(error)),
            ..BrokerError::new("java.lang.RuntimeException", format!("wrap {depth}"))
        };
    }
    ExceptionResponse {
        base: base(1),
        correlation_id: 1,
        exception: Some(error),
    }
    .into()
}

#[test]
fn test_deepest_accepted_cause_chain_round_trips() {
    for (mode, opts) in modes() {
        let sample = error_chain(32);
        let mut encoder = OpenWireFormat::new(opts.clone()).unwrap();
        let mut decoder = OpenWireFormat::new(opts).unwrap();
        let frame = encoder
            .marshal(&sample)
            .unwrap_or_else(|e| panic!("{mode}: {e}"));
        assert_eq!(decoder.unmarshal(&frame).unwrap(), sample, "{mode}");
    }
}

#[test]
fn test_cause_chain_too_deep_to_decode_is_not_encoded() {
    for (mode, opts) in modes() {
        let mut wf = OpenWireFormat::new(opts).unwrap();
        for chain in [33, 40] {
            assert!(
                matches!(
                    wf.marshal(&error_chain(chain)),
                    Err(ProtocolError::InvalidData(constants::ERR_NESTING_TOO_DEEP))
                ),
                "{mode}: chain of {chain}"
            );
        }
        // a refused frame leaves the format usable
        let frame = wf.marshal(&error_chain(2)).unwrap();
        assert_eq!(wf.unmarshal(&frame).unwrap(), error_chain(2), "{mode}");
    }
}

#[test]
fn test_handcrafted_deep_cause_chain_is_refused_by_the_decoder() {
    // loose exception response built by hand: type, command id, response flag,
    // correlation id, then 40 errors with no class, no message and no frames
    let mut body = vec![31u8, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    for _ in 0..40 {
        body.extend_from_slice(&[1, 0, 0, 0, 0]);
    }
    body.push(0);
    let mut frame = (body.len() as i32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);

    let mut wf = OpenWireFormat::new(options(false, false)).unwrap();
    assert!(matches!(
        wf.unmarshal(&frame),
        Err(ProtocolError::InvalidData(constants::ERR_NESTING_TOO_DEEP))
    ));
}

#[test]
fn test_tight_frame_with_missing_bits_underruns() {
    let mut wf = OpenWireFormat::new(options(true, false)).unwrap();
    let frame = wf.marshal(&Queue::new("q").into()).unwrap().to_vec();
    // zero-length boolean stream: the decoder runs out of presence bits
    let mut broken = frame[..5].to_vec();
    broken.push(0);
    broken.extend_from_slice(&frame[7..]);
    let size = (broken.len() - 4) as i32;
    broken[..4].copy_from_slice(&size.to_be_bytes());
    assert!(matches!(
        wf.unmarshal(&broken),
        Err(ProtocolError::BitStreamUnderrun)
    ));
}
