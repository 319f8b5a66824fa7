//! Per-connection tasks.
//!
//! Each accepted connection reads its handshake, registers with the
//! coordinator through the event channel, then forwards every line it reads
//! as an [`Event::Line`]. A companion writer task drains the lines the
//! coordinator queues for the session.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use lockstep_protocol::{LineReader, LineWriter, Message, decode};

use crate::error::{ServerError, ServerResult};
use crate::registry::SessionHandle;
use crate::socket::Connection;

/// Input to the coordinator task.
#[derive(Debug)]
pub(crate) enum Event {
    /// A connection completed its handshake and wants a session.
    Join {
        hello: Message,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<ServerResult<SessionHandle>>,
    },
    /// A session sent a line.
    Line { handle: SessionHandle, line: String },
    /// A session's connection ended, cleanly or with `error`.
    Left {
        handle: SessionHandle,
        error: Option<ServerError>,
    },
    /// A connection failed before it had a session.
    Rejected { peer: SocketAddr, error: ServerError },
}

/// Drives one connection from handshake to close.
pub(crate) async fn handle_connection(
    connection: Connection,
    events: mpsc::UnboundedSender<Event>,
    handshake_timeout: Duration,
) {
    let peer = connection.peer_addr();
    let (read_half, write_half, _permit) = connection.into_parts();
    let mut reader = LineReader::new(BufReader::new(read_half));

    let hello = match tokio::time::timeout(handshake_timeout, read_handshake(&mut reader)).await {
        Ok(Ok(hello)) => hello,
        Ok(Err(error)) => {
            let _ = events.send(Event::Rejected { peer, error });
            return;
        }
        Err(_) => {
            let error = ServerError::handshake(format!(
                "no connect line within {}ms",
                handshake_timeout.as_millis()
            ));
            let _ = events.send(Event::Rejected { peer, error });
            return;
        }
    };

    let (outbound, lines) = mpsc::unbounded_channel();
    let (reply, registered) = oneshot::channel();
    if events
        .send(Event::Join {
            hello,
            peer,
            outbound,
            reply,
        })
        .is_err()
    {
        return;
    }

    let handle = match registered.await {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "closing rejected connection");
            return;
        }
        Err(_) => return,
    };

    let writer = tokio::spawn(write_lines(LineWriter::new(write_half), lines));
    let error = read_lines(&mut reader, handle, &events).await;
    let _ = events.send(Event::Left { handle, error });

    // The coordinator drops the sender once it has processed `Left`.
    let _ = writer.await;
}

async fn read_handshake(reader: &mut LineReader<BufReader<OwnedReadHalf>>) -> ServerResult<Message> {
    let line = reader
        .read_line()
        .await?
        .ok_or_else(|| ServerError::handshake("connection closed before handshake"))?;

    let message = decode(&line)?;
    if !message.is_handshake() {
        return Err(ServerError::handshake(format!(
            "first line must be S or A, got {}",
            message.command()
        )));
    }
    Ok(message)
}

/// Forwards lines until the peer closes or the stream breaks.
async fn read_lines(
    reader: &mut LineReader<BufReader<OwnedReadHalf>>,
    handle: SessionHandle,
    events: &mpsc::UnboundedSender<Event>,
) -> Option<ServerError> {
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                if events.send(Event::Line { handle, line }).is_err() {
                    return None;
                }
            }
            Ok(None) => return None,
            Err(e) if e.is_fatal() => return Some(e.into()),
            Err(e) => warn!(?handle, error = %e, "skipping unreadable line"),
        }
    }
}

async fn write_lines(mut writer: LineWriter<OwnedWriteHalf>, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = writer.write_line(&line).await {
            debug!(error = %e, "write failed, dropping session output");
            return;
        }
        while let Ok(line) = lines.try_recv() {
            if let Err(e) = writer.write_line(&line).await {
                debug!(error = %e, "write failed, dropping session output");
                return;
            }
        }
        if let Err(e) = writer.flush().await {
            debug!(error = %e, "flush failed, dropping session output");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
