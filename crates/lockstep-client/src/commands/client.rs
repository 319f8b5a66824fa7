//! Client command: a headless render loop driven by the coordinator.
//!
//! Each tick calls `update()`, which advances a bouncing ball when the
//! coordinator releases a new frame, then `done_rendering()`. Every client
//! started with the same settings computes the same ball position for the
//! same frame, which is what the barrier is for.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use lockstep_core::ClientId;

use crate::cli::ClientArgs;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::io::IoThread;
use crate::runtime::{ClientRuntime, Phase};

/// Size of the virtual canvas the ball bounces in.
pub const CANVAS: (f32, f32) = (1920.0, 1080.0);

const RADIUS: f32 = 30.0;
const SPEED: (f32, f32) = (10.0, 10.0);

/// Frames between progress logs.
const REPORT_EVERY: u64 = 60;

/// A ball bouncing inside a rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub position: (f32, f32),
    pub velocity: (f32, f32),
    bounds: (f32, f32),
}

impl Ball {
    /// A ball at the centre of a `width` by `height` canvas.
    pub fn centered(width: f32, height: f32) -> Self {
        Self::new((width / 2.0, height / 2.0), SPEED, (width, height))
    }

    /// A ball at `position`, clamped so it starts fully inside the canvas.
    pub fn new(position: (f32, f32), velocity: (f32, f32), bounds: (f32, f32)) -> Self {
        let clamp = |v: f32, max: f32| v.clamp(RADIUS, (max - RADIUS).max(RADIUS));
        Self {
            position: (clamp(position.0, bounds.0), clamp(position.1, bounds.1)),
            velocity,
            bounds,
        }
    }

    /// Moves one frame, reversing direction at the edges.
    pub fn step(&mut self) {
        if self.position.0 < RADIUS || self.position.0 > self.bounds.0 - RADIUS {
            self.velocity.0 = -self.velocity.0;
        }
        if self.position.1 < RADIUS || self.position.1 > self.bounds.1 - RADIUS {
            self.velocity.1 = -self.velocity.1;
        }
        self.position.0 += self.velocity.0;
        self.position.1 += self.velocity.1;
    }

    /// The data message announcing this ball's position.
    pub fn to_message(&self) -> String {
        format!("ball,{:.1},{:.1}", self.position.0, self.position.1)
    }
}

/// Applies command-line overrides on top of the file configuration.
pub fn apply_overrides(config: &ClientConfig, args: &ClientArgs) -> ClientConfig {
    let mut config = config.clone();
    let client = &mut config.client;
    if let Some(id) = args.id {
        client.id = id;
    }
    if let Some(ref name) = args.name {
        client.name = Some(name.clone());
    }
    if let Some(ref host) = args.host {
        client.host = host.clone();
    }
    if let Some(port) = args.port {
        client.port = port;
    }
    if args.asynchronous {
        client.mode = lockstep_core::SyncMode::Async;
        client.wants_data = args.wants_data;
    }
    if let Some(fps) = args.fps {
        config.demo.fps = fps;
    }
    if let Some(every) = args.message_every {
        config.demo.message_every = every;
    }
    config
}

/// Runs the demo until the frame limit or until the coordinator goes away.
pub async fn run(config: &ClientConfig, args: ClientArgs) -> ClientResult<()> {
    let config = apply_overrides(config, &args);
    config.validate().map_err(ClientError::Config)?;

    if args.io_thread {
        return tokio::task::spawn_blocking(move || run_with_io_thread(&config, args.frames))
            .await
            .map_err(|e| ClientError::Connection(format!("render thread failed: {e}")))?;
    }

    let mut demo = Demo::new(&config, args.frames);
    let settings = demo.runtime.settings().clone();
    demo.runtime.start(&settings.host, settings.port).await?;

    let mut ticker = tokio::time::interval(demo.tick_interval());
    loop {
        ticker.tick().await;
        if !demo.tick()? {
            break;
        }
    }
    demo.finish();
    Ok(())
}

/// Host loop on a plain thread, with the network on an [`IoThread`].
fn run_with_io_thread(config: &ClientConfig, frames: Option<u64>) -> ClientResult<()> {
    let io = IoThread::spawn()?;
    let mut demo = Demo::new(config, frames);
    let settings = demo.runtime.settings().clone();
    demo.runtime.start_on(&io, &settings.host, settings.port)?;

    let interval = demo.tick_interval();
    while demo.tick()? {
        std::thread::sleep(interval);
    }
    demo.finish();
    Ok(())
}

/// Render loop state shared by both hosting modes.
struct Demo {
    runtime: ClientRuntime,
    ball: Arc<Mutex<Ball>>,
    fps: u32,
    message_every: u64,
    frame_limit: Option<u64>,
    rendered: u64,
    last_frame: u64,
}

impl Demo {
    fn new(config: &ClientConfig, frame_limit: Option<u64>) -> Self {
        let ball = Arc::new(Mutex::new(Ball::centered(CANVAS.0, CANVAS.1)));
        let mut runtime = ClientRuntime::new(config.client_settings());

        let frame_ball = ball.clone();
        let reset_ball = ball.clone();
        runtime
            .on_frame_advance(move |_| lock(&frame_ball).step())
            .on_reset(move || *lock(&reset_ball) = Ball::centered(CANVAS.0, CANVAS.1))
            .on_data_message(|payload: &str, from: ClientId| {
                debug!(from = %from, payload, "data message");
            })
            .on_error(|e| warn!(error = %e, "coordinator connection ended"));

        Self {
            runtime,
            ball,
            fps: config.demo.fps.max(1),
            message_every: config.demo.message_every,
            frame_limit,
            rendered: 0,
            last_frame: 0,
        }
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    /// One host tick. Returns false once the frame limit is reached.
    fn tick(&mut self) -> ClientResult<bool> {
        self.runtime.update();
        if self.runtime.phase() == Phase::Disconnected {
            return Err(ClientError::Disconnected);
        }

        let frame = self.runtime.current_render_frame();
        if frame != self.last_frame && frame > 0 {
            self.last_frame = frame;
            self.rendered += 1;
            let ball = *lock(&self.ball);

            if self.message_every > 0 && frame % self.message_every == 0 {
                self.runtime.send_message(&ball.to_message())?;
            }
            if frame % REPORT_EVERY == 0 {
                info!(
                    frame,
                    ups = self.runtime.updates_per_second(),
                    x = ball.position.0,
                    y = ball.position.1,
                    "rendering"
                );
            }
        }

        self.runtime.done_rendering()?;
        Ok(self.frame_limit.is_none_or(|limit| self.rendered < limit))
    }

    fn finish(&mut self) {
        info!(
            frames = self.rendered,
            last_frame = self.last_frame,
            "demo finished"
        );
        self.runtime.stop();
    }
}

fn lock(ball: &Mutex<Ball>) -> std::sync::MutexGuard<'_, Ball> {
    ball.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ball_starts_centered_and_moves() {
        let mut ball = Ball::centered(200.0, 100.0);
        assert_eq!(ball.position, (100.0, 50.0));

        ball.step();
        assert_eq!(ball.position, (110.0, 60.0));
    }

    #[test]
    fn ball_bounces_off_edges() {
        let mut ball = Ball::new((169.0, 50.0), (10.0, 0.0), (200.0, 100.0));
        ball.step();
        assert_eq!(ball.position.0, 179.0);
        ball.step();
        assert_eq!(ball.velocity.0, -10.0);
        assert_eq!(ball.position.0, 169.0);
    }

    #[test]
    fn ball_is_clamped_inside_the_canvas() {
        let ball = Ball::new((0.0, 500.0), SPEED, (200.0, 100.0));
        assert_eq!(ball.position, (RADIUS, 100.0 - RADIUS));
    }

    #[test]
    fn ball_message_format() {
        let ball = Ball::centered(1920.0, 1080.0);
        assert_eq!(ball.to_message(), "ball,960.0,540.0");
    }

    #[test]
    fn overrides_switch_to_async() {
        let args = ClientArgs {
            id: Some(12),
            asynchronous: true,
            wants_data: true,
            fps: Some(30),
            ..Default::default()
        };
        let config = apply_overrides(&ClientConfig::default(), &args);
        let settings = config.client_settings();

        assert!(settings.is_async());
        assert!(settings.wants_data);
        assert_eq!(settings.client_id, ClientId(12));
        assert_eq!(config.demo.fps, 30);
    }

    #[test]
    fn identical_runs_agree_on_position() {
        let mut a = Ball::centered(CANVAS.0, CANVAS.1);
        let mut b = Ball::centered(CANVAS.0, CANVAS.1);
        for _ in 0..500 {
            a.step();
            b.step();
        }
        assert_eq!(a, b);
    }
}
