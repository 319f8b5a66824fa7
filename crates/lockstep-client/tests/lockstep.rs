//! End-to-end runs of client runtimes against a real coordinator over
//! loopback TCP.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use lockstep_client::{ClientRuntime, IoThread, Phase};
use lockstep_core::{ClientId, ClientSettings};
use lockstep_server::{ServerConfig, ServerResult, ShutdownHandle, SignalHandler, SyncServer};

struct Coordinator {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: JoinHandle<ServerResult<()>>,
}

impl Coordinator {
    async fn start() -> Self {
        let config = ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        let server = SyncServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let signals = SignalHandler::new();
        let shutdown = signals.shutdown_handle();
        let task = tokio::spawn(server.run_until_shutdown(signals.shutdown().wait()));
        Self {
            addr,
            shutdown,
            task,
        }
    }

    async fn stop(self) {
        self.shutdown.trigger();
        self.task.await.unwrap().unwrap();
    }
}

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// A sync client that records every frame it is asked to render.
fn renderer(id: u32, addr: SocketAddr) -> (ClientRuntime, Log<u64>) {
    let frames = log();
    let mut runtime = ClientRuntime::new(ClientSettings::new(id, "127.0.0.1", addr.port()));
    let sink = frames.clone();
    runtime.on_frame_advance(move |frame| sink.lock().unwrap().push(frame));
    (runtime, frames)
}

/// Runs host ticks on every client until `done` holds.
async fn drive(
    clients: &mut [&mut ClientRuntime],
    done: impl Fn(&[&mut ClientRuntime]) -> bool,
) {
    for _ in 0..2000 {
        for client in clients.iter_mut() {
            client.update();
            if client.is_connected() {
                client.done_rendering().unwrap();
            }
        }
        if done(clients) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("clients did not reach the expected state");
}

fn last(frames: &Log<u64>) -> u64 {
    frames.lock().unwrap().last().copied().unwrap_or(0)
}

#[tokio::test]
async fn two_renderers_stay_in_lockstep() {
    let server = Coordinator::start().await;
    let (mut a, frames_a) = renderer(1, server.addr);
    let (mut b, frames_b) = renderer(2, server.addr);
    a.start("127.0.0.1", server.addr.port()).await.unwrap();
    b.start("127.0.0.1", server.addr.port()).await.unwrap();

    drive(&mut [&mut a, &mut b], |_| last(&frames_a) >= 30 && last(&frames_b) >= 30).await;

    for frames in [&frames_a, &frames_b] {
        let frames = frames.lock().unwrap();
        assert!(
            frames.windows(2).all(|pair| pair[1] == pair[0] + 1),
            "frames must be consecutive: {frames:?}"
        );
    }
    // The first client rendered alone until the second joined.
    assert_eq!(frames_a.lock().unwrap()[0], 2);
    assert_eq!(a.phase(), Phase::Synced);
    assert!(a.current_render_frame().abs_diff(b.current_render_frame()) <= 1);

    server.stop().await;
}

#[tokio::test]
async fn data_messages_follow_their_targets() {
    let server = Coordinator::start().await;
    let port = server.addr.port();
    let (mut a, _) = renderer(1, server.addr);
    let (mut b, _) = renderer(2, server.addr);

    let received_b = log();
    let sink = received_b.clone();
    b.on_data_message(move |payload, from| sink.lock().unwrap().push((payload.to_owned(), from)));

    let watcher_seen = log::<String>();
    let mut watcher =
        ClientRuntime::new(ClientSettings::new(9, "127.0.0.1", port).asynchronous(false));
    let sink = watcher_seen.clone();
    watcher.on_data_message(move |payload, _| sink.lock().unwrap().push(payload.to_owned()));

    a.start("127.0.0.1", port).await.unwrap();
    b.start("127.0.0.1", port).await.unwrap();
    watcher.start("127.0.0.1", port).await.unwrap();

    drive(&mut [&mut a, &mut b, &mut watcher], |c| {
        c[0].phase() == Phase::Synced && c[1].phase() == Phase::Synced
    })
    .await;
    a.send_message_to("for b, only", [2u32]).unwrap();
    a.send_message("everyone").unwrap();

    drive(&mut [&mut a, &mut b, &mut watcher], |_| received_b.lock().unwrap().len() >= 2).await;

    assert_eq!(
        *received_b.lock().unwrap(),
        vec![
            ("for b, only".to_owned(), ClientId(1)),
            ("everyone".to_owned(), ClientId(1)),
        ]
    );
    assert!(watcher_seen.lock().unwrap().is_empty());
    assert!(watcher.current_render_frame() > 0);

    server.stop().await;
}

#[tokio::test]
async fn departed_client_does_not_wedge_the_barrier() {
    let server = Coordinator::start().await;
    let port = server.addr.port();
    let (mut a, frames_a) = renderer(1, server.addr);
    let (mut b, _) = renderer(2, server.addr);
    a.start("127.0.0.1", port).await.unwrap();
    b.start("127.0.0.1", port).await.unwrap();

    drive(&mut [&mut a, &mut b], |_| last(&frames_a) >= 5).await;

    b.stop();
    let stalled_at = last(&frames_a);
    drive(&mut [&mut a], |_| last(&frames_a) >= stalled_at + 10).await;

    server.stop().await;
}

#[tokio::test]
async fn reset_restarts_every_client() {
    let server = Coordinator::start().await;
    let port = server.addr.port();
    let (mut a, frames_a) = renderer(1, server.addr);
    let (mut b, frames_b) = renderer(2, server.addr);

    let resets = Arc::new(Mutex::new(0u32));
    for client in [&mut a, &mut b] {
        let sink = resets.clone();
        client.on_reset(move || *sink.lock().unwrap() += 1);
    }
    a.start("127.0.0.1", port).await.unwrap();
    b.start("127.0.0.1", port).await.unwrap();

    drive(&mut [&mut a, &mut b], |_| last(&frames_a) >= 20).await;
    a.reset_all().unwrap();

    drive(&mut [&mut a, &mut b], |_| *resets.lock().unwrap() == 2).await;
    frames_a.lock().unwrap().clear();
    frames_b.lock().unwrap().clear();

    drive(&mut [&mut a, &mut b], |_| last(&frames_b) >= 3).await;
    assert!(frames_a.lock().unwrap().iter().all(|&f| f < 20));

    server.stop().await;
}

#[tokio::test]
async fn pause_is_seen_by_every_client() {
    let server = Coordinator::start().await;
    let port = server.addr.port();
    let (mut a, frames_a) = renderer(1, server.addr);
    let (mut b, _) = renderer(2, server.addr);
    a.start("127.0.0.1", port).await.unwrap();
    b.start("127.0.0.1", port).await.unwrap();

    drive(&mut [&mut a, &mut b], |_| last(&frames_a) >= 3).await;
    b.toggle_pause().unwrap();
    drive(&mut [&mut a, &mut b], |c| c[0].is_paused() && c[1].is_paused()).await;

    // Held: a few more ticks render nothing new.
    let held = last(&frames_a);
    for _ in 0..20 {
        a.update();
        b.update();
        a.done_rendering().unwrap();
        b.done_rendering().unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(last(&frames_a) <= held + 1);

    a.toggle_pause().unwrap();
    drive(&mut [&mut a, &mut b], |_| last(&frames_a) >= held + 5).await;
    assert!(!a.is_paused());

    server.stop().await;
}

#[tokio::test]
async fn duplicate_id_is_turned_away() {
    let server = Coordinator::start().await;
    let port = server.addr.port();
    let (mut first, frames) = renderer(5, server.addr);
    let (mut second, _) = renderer(5, server.addr);

    let errors = log::<String>();
    let sink = errors.clone();
    second.on_error(move |e| sink.lock().unwrap().push(e.to_string()));

    first.start("127.0.0.1", port).await.unwrap();
    drive(&mut [&mut first], |_| last(&frames) >= 2).await;

    second.start("127.0.0.1", port).await.unwrap();
    drive(&mut [&mut first, &mut second], |c| {
        c[1].phase() == Phase::Disconnected
    })
    .await;
    assert_eq!(errors.lock().unwrap().len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn coordinator_shutdown_disconnects_clients() {
    let server = Coordinator::start().await;
    let (mut a, frames) = renderer(1, server.addr);
    a.start("127.0.0.1", server.addr.port()).await.unwrap();
    drive(&mut [&mut a], |_| last(&frames) >= 2).await;

    server.stop().await;
    for _ in 0..500 {
        a.update();
        if a.phase() == Phase::Disconnected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("client never noticed the coordinator going away");
}

#[test]
fn io_thread_hosts_the_connection() {
    let server_rt = tokio::runtime::Runtime::new().unwrap();
    let server = server_rt.block_on(Coordinator::start());

    let io = IoThread::spawn().unwrap();
    let (mut client, frames) = renderer(1, server.addr);
    client.start_on(&io, "127.0.0.1", server.addr.port()).unwrap();

    for _ in 0..2000 {
        client.update();
        client.done_rendering().unwrap();
        if last(&frames) >= 10 {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(last(&frames) >= 10);

    client.stop();
    drop(io);
    server_rt.block_on(server.stop());
}
