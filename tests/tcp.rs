//! TCP front end over real sockets

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use openwire_gateway::config::GatewayConfig;
use openwire_gateway::error::constants;
use openwire_gateway::gateway::ProtocolFrame;
use openwire_gateway::openwire::command::*;
use openwire_gateway::openwire::{OpenWireCodec, WireOptions};
use openwire_gateway::transport::{serve, GatewayEvent};
use openwire_gateway::utils::Metrics;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    events: mpsc::Receiver<GatewayEvent>,
    shutdown: mpsc::Sender<()>,
    server: JoinHandle<openwire_gateway::Result<()>>,
    metrics: Arc<Metrics>,
}

async fn start(config: GatewayConfig) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, events) = mpsc::channel(64);
    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let metrics = Arc::new(Metrics::new());
    let server = tokio::spawn(serve(
        listener,
        config,
        events_tx,
        shutdown_rx,
        Arc::clone(&metrics),
    ));
    Harness {
        addr,
        events,
        shutdown,
        server,
        metrics,
    }
}

impl Harness {
    async fn next_event(&mut self) -> GatewayEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("event within timeout")
            .expect("gateway still running")
    }

    async fn stop(self) {
        self.shutdown.send(()).await.unwrap();
        timeout(WAIT * 3, self.server)
            .await
            .expect("server stops")
            .unwrap()
            .unwrap();
    }
}

fn quick_config() -> GatewayConfig {
    GatewayConfig::default_with_overrides(|c| {
        c.detection.timeout = Duration::from_millis(200);
        c.server.shutdown_timeout = Duration::from_secs(1);
    })
}

/// Client side of an OpenWire session, negotiated against the gateway
async fn openwire_client(addr: SocketAddr) -> Framed<TcpStream, OpenWireCodec> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let codec = OpenWireCodec::for_negotiation(WireOptions::preferred()).unwrap();
    let mut framed = Framed::new(stream, codec);
    let hello = framed.codec().format().preferred_info().unwrap();
    framed.send(DataStructure::from(hello)).await.unwrap();

    let reply = timeout(WAIT, framed.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(reply, DataStructure::WireFormatInfo(_)));
    assert!(framed.codec().format().is_negotiated());
    framed
}

#[tokio::test]
async fn test_openwire_round_trip() {
    let mut harness = start(quick_config()).await;
    let mut client = openwire_client(harness.addr).await;

    let GatewayEvent::Detected {
        handle,
        protocol,
        outbound,
        ..
    } = harness.next_event().await
    else {
        panic!("expected detection first");
    };
    assert_eq!(protocol, "openwire");
    assert!(matches!(
        harness.next_event().await,
        GatewayEvent::Frame {
            frame: ProtocolFrame::OpenWire(DataStructure::WireFormatInfo(_)),
            ..
        }
    ));

    let keep_alive: DataStructure = KeepAliveInfo {
        base: BaseCommand {
            command_id: 1,
            response_required: true,
        },
    }
    .into();
    client.send(keep_alive.clone()).await.unwrap();
    match harness.next_event().await {
        GatewayEvent::Frame { handle: h, frame } => {
            assert_eq!(h, handle);
            assert_eq!(frame, ProtocolFrame::OpenWire(keep_alive));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let response: DataStructure = Response {
        base: BaseCommand::default(),
        correlation_id: 1,
    }
    .into();
    outbound
        .send(ProtocolFrame::OpenWire(response.clone()))
        .await
        .unwrap();
    let received = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(received, response);

    drop(client);
    assert!(matches!(
        harness.next_event().await,
        GatewayEvent::Closed { handle: h } if h == handle
    ));
    harness.stop().await;
}

#[tokio::test]
async fn test_amqp_is_relayed_raw_and_echoed() {
    let mut harness = start(quick_config()).await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream.write_all(b"AMQP\x00\x00\x09\x01").await.unwrap();

    let GatewayEvent::Detected {
        protocol, outbound, ..
    } = harness.next_event().await
    else {
        panic!("expected detection");
    };
    assert_eq!(protocol, "amqp");

    let mut relayed = BytesMut::new();
    while relayed.len() < 8 {
        match harness.next_event().await {
            GatewayEvent::Frame {
                frame: ProtocolFrame::Raw(bytes),
                ..
            } => relayed.extend_from_slice(&bytes),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(&relayed[..], b"AMQP\x00\x00\x09\x01");

    outbound
        .send(ProtocolFrame::Raw(Bytes::from_static(b"\x01\x00\x00")))
        .await
        .unwrap();
    let mut reply = [0u8; 3];
    timeout(WAIT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"\x01\x00\x00");
    harness.stop().await;
}

#[tokio::test]
async fn test_garbage_connection_is_closed() {
    let mut harness = start(quick_config()).await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream.write_all(&[0xff; 32]).await.unwrap();

    assert!(matches!(
        harness.next_event().await,
        GatewayEvent::Rejected { reason, .. } if reason == constants::ERR_DETECTION_MISMATCH
    ));
    assert!(matches!(harness.next_event().await, GatewayEvent::Closed { .. }));

    let mut buf = [0u8; 8];
    let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0, "gateway closes the socket");
    assert_eq!(harness.metrics.snapshot().connections_rejected, 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let mut harness = start(quick_config()).await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream.write_all(b"\x00\x00").await.unwrap();

    assert!(matches!(
        harness.next_event().await,
        GatewayEvent::Rejected { reason, .. } if reason == constants::ERR_DETECTION_TIMEOUT
    ));
    assert!(matches!(harness.next_event().await, GatewayEvent::Closed { .. }));
    harness.stop().await;
}

#[tokio::test]
async fn test_one_bad_client_does_not_affect_another() {
    let mut harness = start(quick_config()).await;
    let mut good = openwire_client(harness.addr).await;
    let GatewayEvent::Detected { handle: good_handle, .. } = harness.next_event().await else {
        panic!("expected detection");
    };
    harness.next_event().await;

    let mut bad = openwire_client(harness.addr).await;
    let GatewayEvent::Detected { handle: bad_handle, .. } = harness.next_event().await else {
        panic!("expected detection");
    };
    harness.next_event().await;
    bad.get_mut().write_all(&[0, 0, 0, 1, 0xEE]).await.unwrap();
    assert!(matches!(
        harness.next_event().await,
        GatewayEvent::Closed { handle } if handle == bad_handle
    ));

    good.send(DataStructure::from(KeepAliveInfo::default())).await.unwrap();
    assert!(matches!(
        harness.next_event().await,
        GatewayEvent::Frame { handle, .. } if handle == good_handle
    ));
    harness.stop().await;
}

#[tokio::test]
async fn test_connection_limit() {
    let config = GatewayConfig::default_with_overrides(|c| {
        c.server.max_connections = 1;
        c.server.shutdown_timeout = Duration::from_secs(1);
    });
    let mut harness = start(config).await;
    let _first = openwire_client(harness.addr).await;
    harness.next_event().await;

    let mut second = TcpStream::connect(harness.addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = timeout(WAIT, second.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0, "second connection is dropped");
    assert_eq!(harness.metrics.snapshot().connections_rejected, 1);
    harness.stop().await;
}
