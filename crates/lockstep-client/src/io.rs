//! Optional background I/O thread.
//!
//! A host application with its own render loop (and no async runtime) can
//! run the network side of a [`ClientRuntime`](crate::ClientRuntime) on a
//! dedicated OS thread. The host thread keeps calling `update()` and
//! `done_rendering()`; only the socket reads and writes move.

use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// A current-thread tokio runtime driven by its own OS thread.
pub struct IoThread {
    handle: Handle,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IoThread {
    /// Starts the thread and its runtime.
    pub fn spawn() -> ClientResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (stop, stopped) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("lockstep-io".into())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                debug!("io thread stopped");
            })?;

        Ok(Self {
            handle,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Handle for spawning onto the I/O runtime.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs `future` on the I/O thread and blocks the calling thread until
    /// it completes.
    ///
    /// Must not be called from inside an async context.
    pub fn run<F>(&self, future: F) -> ClientResult<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.blocking_recv()
            .map_err(|_| ClientError::Connection("io thread stopped".into()))
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_futures_on_the_io_thread() {
        let io = IoThread::spawn().unwrap();
        let name = io
            .run(async { std::thread::current().name().map(str::to_owned) })
            .unwrap();
        assert_eq!(name.as_deref(), Some("lockstep-io"));
    }

    #[test]
    fn drop_stops_the_thread() {
        let io = IoThread::spawn().unwrap();
        io.run(async {}).unwrap();
        drop(io);
    }
}
