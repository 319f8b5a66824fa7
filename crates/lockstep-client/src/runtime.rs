//! Client session runtime.
//!
//! A [`ClientRuntime`] owns one connection to the coordinator and tracks the
//! frame the host application should render. The network side runs on tokio
//! tasks; everything the application sees happens on the thread that calls
//! [`ClientRuntime::update`].
//!
//! ```rust,no_run
//! use lockstep_client::ClientRuntime;
//! use lockstep_core::ClientSettings;
//!
//! # async fn demo() -> lockstep_client::ClientResult<()> {
//! let mut client = ClientRuntime::new(ClientSettings::new(1, "localhost", 9002));
//! client.on_frame_advance(|frame| println!("render frame {frame}"));
//! client.start("localhost", 9002).await?;
//!
//! loop {
//!     client.update();
//!     // draw...
//!     client.done_rendering()?;
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use lockstep_core::{ClientId, ClientSettings, UpdateRate};
use lockstep_protocol::{EmbeddedData, Message, Targets, decode, encode};

use crate::error::{ClientError, ClientResult};
use crate::io::IoThread;
use crate::socket::{self, Inbound, InboundQueue, Transport};

/// Frame the coordinator starts from, and returns to on reset.
const FIRST_FRAME: u64 = 1;

/// Connection lifecycle of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No connection.
    Disconnected,
    /// Opening the stream.
    Connecting,
    /// Handshake sent, no frame received yet.
    AwaitingFirstFrame,
    /// Receiving frames.
    Synced,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingFirstFrame => "awaiting first frame",
            Self::Synced => "synced",
        };
        f.write_str(name)
    }
}

type FrameHandler = Box<dyn FnMut(u64) + Send>;
type ResetHandler = Box<dyn FnMut() + Send>;
type DataHandler = Box<dyn FnMut(&str, ClientId) + Send>;
type ErrorHandler = Box<dyn FnMut(&ClientError) + Send>;

/// Per-process client of the frame barrier.
pub struct ClientRuntime {
    settings: ClientSettings,
    phase: Phase,
    current_render_frame: u64,
    last_frame_confirmed_sent: u64,
    frame_ready: bool,
    paused: bool,
    rate: UpdateRate,
    inbound: InboundQueue,
    transport: Option<Transport>,
    on_frame_advance: Option<FrameHandler>,
    on_reset: Option<ResetHandler>,
    on_data_message: Option<DataHandler>,
    on_error: Option<ErrorHandler>,
}

impl fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("client_id", &self.settings.client_id)
            .field("mode", &self.settings.mode)
            .field("phase", &self.phase)
            .field("current_render_frame", &self.current_render_frame)
            .field("last_frame_confirmed_sent", &self.last_frame_confirmed_sent)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

impl ClientRuntime {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            phase: Phase::Disconnected,
            current_render_frame: 0,
            last_frame_confirmed_sent: 0,
            frame_ready: false,
            paused: false,
            rate: UpdateRate::new(),
            inbound: InboundQueue::default(),
            transport: None,
            on_frame_advance: None,
            on_reset: None,
            on_data_message: None,
            on_error: None,
        }
    }

    /// Called from [`update`](Self::update) with the frame to render.
    ///
    /// Required for synchronous clients.
    pub fn on_frame_advance<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.on_frame_advance = Some(Box::new(handler));
        self
    }

    /// Called when the coordinator resets every client.
    pub fn on_reset<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_reset = Some(Box::new(handler));
        self
    }

    /// Called with each data message and the id of the client that sent it.
    pub fn on_data_message<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&str, ClientId) + Send + 'static,
    {
        self.on_data_message = Some(Box::new(handler));
        self
    }

    /// Called when the connection fails or the coordinator goes away.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&ClientError) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn client_id(&self) -> ClientId {
        self.settings.client_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// The frame the application should be rendering.
    pub fn current_render_frame(&self) -> u64 {
        self.current_render_frame
    }

    /// Frame updates received per second, averaged.
    pub fn updates_per_second(&self) -> f64 {
        self.rate.updates_per_second()
    }

    /// Whether the coordinator was last told to pause.
    ///
    /// Advisory only: the coordinator holds the barrier while paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Connects to the coordinator using the caller's tokio runtime.
    pub async fn start(&mut self, host: &str, port: u16) -> ClientResult<()> {
        self.stop();
        self.phase = Phase::Connecting;

        match socket::connect(host, port).await {
            Ok(stream) => self.attach(stream),
            Err(e) => {
                self.phase = Phase::Disconnected;
                Err(e)
            }
        }
    }

    /// Connects to the coordinator with the network side on `io`.
    ///
    /// Blocks the calling thread until the connection is open; call it from
    /// the host thread, not from async code.
    pub fn start_on(&mut self, io: &IoThread, host: &str, port: u16) -> ClientResult<()> {
        self.stop();
        self.phase = Phase::Connecting;

        let host = host.to_owned();
        match io.run(async move { socket::connect(&host, port).await }) {
            Ok(Ok(stream)) => self.attach_on(io.handle(), stream),
            Ok(Err(e)) | Err(e) => {
                self.phase = Phase::Disconnected;
                Err(e)
            }
        }
    }

    /// Runs the session over an already-open stream, on the current tokio
    /// runtime.
    pub fn attach<S>(&mut self, stream: S) -> ClientResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let handle = Handle::try_current()
            .map_err(|_| ClientError::Connection("no tokio runtime to run the connection on".into()))?;
        self.attach_on(&handle, stream)
    }

    fn attach_on<S>(&mut self, handle: &Handle, stream: S) -> ClientResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.transport = None;
        self.inbound = InboundQueue::default();
        self.current_render_frame = 0;
        self.last_frame_confirmed_sent = 0;
        self.frame_ready = false;
        self.paused = false;
        self.rate.reset();
        self.phase = Phase::Connecting;

        let transport = Transport::spawn(handle, stream, self.inbound.clone());
        let hello = Message::handshake(&self.settings);
        if let Err(e) = transport.send(encode(&hello)) {
            self.phase = Phase::Disconnected;
            return Err(e);
        }

        self.transport = Some(transport);
        self.phase = Phase::AwaitingFirstFrame;
        info!(
            client_id = %self.settings.client_id,
            mode = %self.settings.mode,
            "handshake sent"
        );
        Ok(())
    }

    /// Processes everything received since the last call.
    ///
    /// Call once per host tick. Data handlers run first, then, for a
    /// synchronous client with a new frame, the frame-advance handler runs
    /// exactly once.
    pub fn update(&mut self) {
        for item in self.inbound.drain() {
            match item {
                Inbound::Line(line) => self.dispatch_line(&line),
                Inbound::Closed(error) => self.connection_closed(error),
            }
        }

        if !self.frame_ready {
            return;
        }
        self.frame_ready = false;

        if self.settings.is_async() {
            return;
        }

        let frame = self.current_render_frame;
        debug_assert!(
            self.on_frame_advance.is_some(),
            "synchronous client has no frame-advance handler"
        );
        match self.on_frame_advance.as_mut() {
            Some(handler) => handler(frame),
            None => error!(frame, "synchronous client has no frame-advance handler"),
        }
    }

    /// Tells the coordinator the current frame is rendered.
    ///
    /// Safe to call on every repaint: only the first call per frame sends an
    /// acknowledgement. Asynchronous clients never acknowledge.
    pub fn done_rendering(&mut self) -> ClientResult<()> {
        let transport = self.transport.as_ref().ok_or(ClientError::NotConnected)?;
        if self.settings.is_async() || self.last_frame_confirmed_sent >= self.current_render_frame {
            return Ok(());
        }

        let ack = Message::DoneRendering {
            client_id: self.settings.client_id,
            frame: self.current_render_frame - 1,
        };
        transport.send(encode(&ack))?;
        self.last_frame_confirmed_sent = self.current_render_frame;
        trace!(frame = self.current_render_frame - 1, "done rendering");
        Ok(())
    }

    /// Sends a data message to every client, delivered with the next frame.
    pub fn send_message(&mut self, payload: &str) -> ClientResult<()> {
        self.send(&Message::broadcast(payload))
    }

    /// Sends a data message to the listed clients only.
    pub fn send_message_to<I>(&mut self, payload: &str, ids: I) -> ClientResult<()>
    where
        I: IntoIterator,
        I::Item: Into<ClientId>,
    {
        self.send(&Message::Data {
            payload: payload.to_owned(),
            targets: Targets::only(ids),
        })
    }

    /// Asks the coordinator to reset every client to the first frame.
    pub fn reset_all(&mut self) -> ClientResult<()> {
        self.send(&Message::Reset)
    }

    /// Asks the coordinator to toggle pause.
    pub fn toggle_pause(&mut self) -> ClientResult<()> {
        self.send(&Message::TogglePause)
    }

    /// Closes the connection. There is no automatic reconnect.
    pub fn stop(&mut self) {
        if self.transport.take().is_some() {
            info!(client_id = %self.settings.client_id, "stopped");
        }
        self.inbound = InboundQueue::default();
        self.frame_ready = false;
        self.phase = Phase::Disconnected;
    }

    fn send(&self, message: &Message) -> ClientResult<()> {
        let transport = self.transport.as_ref().ok_or(ClientError::NotConnected)?;
        transport.send(encode(message))
    }

    fn dispatch_line(&mut self, line: &str) {
        match decode(line) {
            Ok(Message::NextFrame { frame, embedded }) => self.next_frame(frame, embedded),
            Ok(Message::Reset) => self.reset(),
            Ok(Message::TogglePause) => {
                self.paused = !self.paused;
                info!(paused = self.paused, "coordinator pause toggled");
            }
            Ok(other) => {
                warn!(command = %other.command(), "ignoring unexpected message from coordinator");
            }
            Err(e) => warn!(error = %e, line, "dropping undecodable line"),
        }
    }

    fn next_frame(&mut self, frame: u64, embedded: Vec<EmbeddedData>) {
        let Some(render_frame) = frame.checked_add(1) else {
            warn!(frame, "dropping next-frame past the last renderable frame");
            return;
        };
        self.current_render_frame = render_frame;
        self.last_frame_confirmed_sent = frame;
        self.rate.observe(frame);

        if self.phase == Phase::AwaitingFirstFrame {
            info!(frame, "first frame received");
            self.phase = Phase::Synced;
        }

        if let Some(handler) = self.on_data_message.as_mut() {
            for data in &embedded {
                handler(&data.payload, data.from);
            }
        } else if !embedded.is_empty() {
            debug!(count = embedded.len(), "no data handler, dropping data messages");
        }

        self.frame_ready = true;
    }

    fn reset(&mut self) {
        self.current_render_frame = FIRST_FRAME + 1;
        self.last_frame_confirmed_sent = FIRST_FRAME;
        self.rate.reset();
        info!("coordinator reset");

        if let Some(handler) = self.on_reset.as_mut() {
            handler();
        }
    }

    fn connection_closed(&mut self, error: Option<ClientError>) {
        self.transport = None;
        self.frame_ready = false;
        self.phase = Phase::Disconnected;

        let error = error.unwrap_or(ClientError::Disconnected);
        warn!(error = %error, "connection to coordinator lost");
        if let Some(handler) = self.on_error.as_mut() {
            handler(&error);
        }
    }
}
