//! Loopback demonstration of the gateway engine.
//!
//! Accepts a "counterparty" connection on localhost, registers it with the
//! framer, pushes a few outbound messages (including a replay burst), and
//! prints what the counterparty receives and what arrives on the shared bus.
//!
//! Run with: `cargo run --example loopback_gateway`

use std::sync::Arc;

use bytes::Bytes;
use fixgate::prelude::*;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

fn fix_message(msg_type: &str, seq_num: u32) -> Bytes {
    let mut encoder = Encoder::new("FIX.4.4");
    encoder.put_str(35, msg_type);
    encoder.put_str(49, "GATEWAY");
    encoder.put_str(56, "BROKER");
    encoder.put_uint(34, u64::from(seq_num));
    encoder.finish().freeze()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");

    let mut counterparty = TcpStream::connect(addr).await?;
    let (stream, peer) = listener.accept().await?;
    info!(%peer, "counterparty connected");

    let (bus, events) = BusPublication::new(1024);
    let (mut framer, handle) = Framer::new(
        EngineConfig::new(),
        Arc::new(bus),
        Arc::new(LoggingErrorHandler),
        None,
    );

    let library_id = LibraryId::new(1);
    let connection_id = framer.on_connection(
        Box::new(SocketChannel::new(stream)?),
        library_id,
        ConnectionKind::Fix,
    );
    let framer_task = tokio::spawn(framer.run());

    // A live message, then a one-frame replay burst, then another live one.
    handle
        .send(FramerCommand::Outbound {
            connection_id,
            library_id,
            body: fix_message("D", 1),
            metadata: Bytes::new(),
            seq_num: 1,
            sequence_index: 0,
            msg_type: Bytes::from_static(b"D"),
        })
        .await;
    handle
        .send(FramerCommand::StartReplay {
            connection_id,
            correlation_id: 7,
        })
        .await;
    handle
        .send(FramerCommand::ReplayMessage {
            connection_id,
            body: fix_message("D", 1),
            seq_num: 1,
        })
        .await;
    handle
        .send(FramerCommand::ReplayComplete {
            connection_id,
            correlation_id: 7,
        })
        .await;
    handle
        .send(FramerCommand::Outbound {
            connection_id,
            library_id,
            body: fix_message("D", 2),
            metadata: Bytes::new(),
            seq_num: 2,
            sequence_index: 0,
            msg_type: Bytes::from_static(b"D"),
        })
        .await;

    let mut received = vec![0u8; 4096];
    let read = counterparty.read(&mut received).await?;
    info!(
        bytes = read,
        wire = %String::from_utf8_lossy(&received[..read]).replace('\x01', "|"),
        "counterparty received"
    );

    drop(handle);
    framer_task.await.expect("framer task panicked");

    while let Ok(event) = events.try_recv() {
        info!(?event, "bus event");
    }

    Ok(())
}
