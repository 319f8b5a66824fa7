//! TCP listener and the coordinator task.
//!
//! [`SyncServer`] owns the listener and a single [`Coordinator`]. Connection
//! tasks never touch coordinator state directly; they send [`Event`]s over a
//! channel and the server loop applies them one at a time, so every barrier
//! decision is made by one task.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use lockstep_core::ClientId;

use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::error::{ServerError, ServerResult};
use crate::handler::{Event, handle_connection};
use crate::registry::SessionHandle;

/// Callback for transport-level session errors.
///
/// Receives the client id when the failing connection had completed its
/// handshake.
pub type ErrorObserver = Arc<dyn Fn(Option<ClientId>, &ServerError) + Send + Sync>;

/// TCP server running the frame barrier.
pub struct SyncServer {
    config: ServerConfig,
    listener: TcpListener,
    connection_semaphore: Arc<Semaphore>,
    error_observer: Option<ErrorObserver>,
}

impl SyncServer {
    /// Binds the listener described by `config`.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            max_sessions = config.max_sessions,
            "Coordinator listening"
        );

        let connection_semaphore = Arc::new(Semaphore::new(config.max_sessions));
        Ok(Self {
            config,
            listener,
            connection_semaphore,
            error_observer: None,
        })
    }

    /// Registers a callback for transport-level session errors.
    pub fn with_error_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(Option<ClientId>, &ServerError) + Send + Sync + 'static,
    {
        self.error_observer = Some(Arc::new(observer));
        self
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts a single connection, waiting for a free session slot first.
    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(peer = %peer, "Accepted new connection");

        Ok(Connection {
            stream,
            peer,
            permit,
        })
    }

    /// Runs until the process is killed.
    pub async fn run(self) -> ServerResult<()> {
        self.run_until_shutdown(std::future::pending()).await
    }

    /// Runs until `shutdown` completes, then closes every connection.
    pub async fn run_until_shutdown<S>(self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut connections = JoinSet::new();
        let mut hub = Hub::new(self.config.min_frame_interval, self.error_observer.clone());

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = self.accept() => match accepted {
                    Ok(connection) => {
                        connections.spawn(handle_connection(
                            connection,
                            events_tx.clone(),
                            self.config.handshake_timeout,
                        ));
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                Some(event) = events.recv() => hub.handle(event).await,
                _ = ticker.tick() => hub.tick().await,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(hub);
        connections.shutdown().await;
        info!("Coordinator stopped");
        Ok(())
    }
}

/// An accepted client connection holding one session slot.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    permit: OwnedSemaphorePermit,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Splits into read and write halves; the permit must outlive both.
    pub(crate) fn into_parts(self) -> (OwnedReadHalf, OwnedWriteHalf, OwnedSemaphorePermit) {
        let (read, write) = self.stream.into_split();
        (read, write, self.permit)
    }
}

/// Coordinator plus the outbound channel of every session.
struct Hub {
    coordinator: Coordinator,
    writers: HashMap<SessionHandle, mpsc::UnboundedSender<String>>,
    min_frame_interval: Option<Duration>,
    last_advance_at: Option<Instant>,
    flushed_advances: u64,
    error_observer: Option<ErrorObserver>,
}

impl Hub {
    fn new(min_frame_interval: Option<Duration>, error_observer: Option<ErrorObserver>) -> Self {
        Self {
            coordinator: Coordinator::new(),
            writers: HashMap::new(),
            min_frame_interval,
            last_advance_at: None,
            flushed_advances: 0,
            error_observer,
        }
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::Join {
                hello,
                peer,
                outbound,
                reply,
            } => match self.coordinator.register(&hello) {
                Ok(handle) => {
                    if reply.send(Ok(handle)).is_ok() {
                        self.writers.insert(handle, outbound);
                    } else {
                        self.coordinator.disconnect(handle);
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Rejecting connection");
                    self.observe(None, &e);
                    let _ = reply.send(Err(e));
                }
            },
            Event::Line { handle, line } => self.coordinator.handle_line(handle, &line),
            Event::Left { handle, error } => {
                self.writers.remove(&handle);
                let client_id = self.coordinator.session(handle).map(|s| s.id);
                if let Some(e) = &error {
                    warn!(client_id = ?client_id, error = %e, "Session failed");
                    self.observe(client_id, e);
                }
                self.coordinator.disconnect(handle);
            }
            Event::Rejected { peer, error } => {
                warn!(peer = %peer, error = %error, "Handshake failed");
                self.observe(None, &error);
            }
        }
        self.flush().await;
    }

    async fn tick(&mut self) {
        self.coordinator.tick();
        self.flush().await;
    }

    /// Hands queued lines to the writer tasks, holding back a new frame
    /// until the minimum frame interval has passed.
    async fn flush(&mut self) {
        let advances = self.coordinator.advances();
        if advances != self.flushed_advances {
            if let (Some(interval), Some(last)) = (self.min_frame_interval, self.last_advance_at) {
                tokio::time::sleep_until(last + interval).await;
            }
            self.last_advance_at = Some(Instant::now());
            self.flushed_advances = advances;
        }

        for (handle, lines) in self.coordinator.drain_outbound() {
            let Some(writer) = self.writers.get(&handle) else {
                continue;
            };
            for line in lines {
                if writer.send(line).is_err() {
                    break;
                }
            }
        }
    }

    fn observe(&self, client_id: Option<ClientId>, error: &ServerError) {
        if let Some(observer) = &self.error_observer {
            observer(client_id, error);
        }
    }
}
