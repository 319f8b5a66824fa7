//! Stream plumbing between a client runtime and the coordinator.
//!
//! A reader task pushes every received line into a shared queue that the
//! runtime drains from the host thread. A writer task owns the write half
//! and sends whatever the runtime queues on its channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lockstep_protocol::{LineReader, LineWriter};

use crate::error::{ClientError, ClientResult};

/// Something the reader task observed.
#[derive(Debug)]
pub(crate) enum Inbound {
    Line(String),
    /// The stream ended; `Some` when it ended with an error.
    Closed(Option<ClientError>),
}

/// Inbound lines shared between the reader task and the host thread.
///
/// The lock is only held to push or to drain.
#[derive(Debug, Clone, Default)]
pub(crate) struct InboundQueue(Arc<Mutex<VecDeque<Inbound>>>);

impl InboundQueue {
    pub(crate) fn push(&self, item: Inbound) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
    }

    pub(crate) fn drain(&self) -> VecDeque<Inbound> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Opens a TCP connection to the coordinator.
pub(crate) async fn connect(host: &str, port: u16) -> ClientResult<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ClientError::Connection(format!("failed to connect to {host}:{port}: {e}")))?;
    stream.set_nodelay(true)?;
    debug!(host, port, "connected to coordinator");
    Ok(stream)
}

/// The reader and writer tasks of one connection.
///
/// Dropping it stops the reader and lets the writer flush and close.
pub(crate) struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
}

impl Transport {
    pub(crate) fn spawn<S>(handle: &Handle, stream: S, inbound: InboundQueue) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let (outbound, lines) = mpsc::unbounded_channel();

        let reader = handle.spawn(read_lines(LineReader::new(BufReader::new(read)), inbound));
        handle.spawn(write_lines(LineWriter::new(write), lines));

        Self { outbound, reader }
    }

    /// Queues one encoded line for the writer task.
    pub(crate) fn send(&self, line: String) -> ClientResult<()> {
        self.outbound
            .send(line)
            .map_err(|_| ClientError::Disconnected)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_lines<R>(mut reader: LineReader<R>, inbound: InboundQueue)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => inbound.push(Inbound::Line(line)),
            Ok(None) => {
                inbound.push(Inbound::Closed(None));
                return;
            }
            Err(e) if e.is_fatal() => {
                inbound.push(Inbound::Closed(Some(e.into())));
                return;
            }
            Err(e) => warn!(error = %e, "skipping unreadable line"),
        }
    }
}

async fn write_lines<W>(mut writer: LineWriter<W>, mut lines: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        if let Err(e) = writer.write_line(&line).await {
            debug!(error = %e, "write to coordinator failed");
            return;
        }
        while let Ok(line) = lines.try_recv() {
            if let Err(e) = writer.write_line(&line).await {
                debug!(error = %e, "write to coordinator failed");
                return;
            }
        }
        if let Err(e) = writer.flush().await {
            debug!(error = %e, "flush to coordinator failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
