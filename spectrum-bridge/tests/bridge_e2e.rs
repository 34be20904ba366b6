//! End-to-end tests: simulated device → bridge → WebSocket clients

use futures_util::StreamExt;
use spectrum_audio::SignalPattern;
use spectrum_bridge::{
    BridgeConfig, BridgeError, BridgeLifecycleState, ExitReason, ExternalServiceConfig,
    RunningBridge, SimulatedSignal,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn simulated_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.config_path = std::env::temp_dir().join("spectrum-bridge-e2e.toml");
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.audio.simulate = true;
    config.external = None;
    config.shutdown_grace_ms = 1000;
    config
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    ws
}

async fn wait_for_clients(bridge: &RunningBridge, expected: usize) {
    for _ in 0..100 {
        if bridge.client_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} clients, have {}", expected, bridge.client_count());
}

async fn next_spectrum(client: &mut Client) -> Vec<f64> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(1), client.next())
            .await
            .expect("no spectrum within 1s")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("payload is not a JSON array of numbers");
        }
    }
}

#[tokio::test]
async fn test_client_receives_silent_spectra() {
    let config = simulated_config();
    let period = config.audio_config().frame_period();
    let bridge = RunningBridge::start(config).await.unwrap();
    let mut client = connect(bridge.local_addr()).await;
    wait_for_clients(&bridge, 1).await;

    // The next frame is at most one period away once the client is registered
    let started = Instant::now();
    let spectrum = next_spectrum(&mut client).await;
    let first = started.elapsed();
    assert!(first < period * 2 + Duration::from_millis(20), "first spectrum after {:?}", first);

    assert_eq!(spectrum.len(), 128);
    assert!(spectrum.iter().all(|&m| m == 0.0));

    // Spectra keep arriving at the frame rate, not in late bursts
    let started = Instant::now();
    for _ in 0..10 {
        assert_eq!(next_spectrum(&mut client).await.len(), 128);
    }
    let elapsed = started.elapsed();
    assert!(elapsed > period * 8, "ten spectra in {:?}", elapsed);
    assert!(elapsed < period * 12 + Duration::from_millis(40), "ten spectra in {:?}", elapsed);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_sine_input_peaks_at_expected_bin() {
    let mut config = simulated_config();
    config.audio.simulate_signal = SimulatedSignal::Sine;
    assert!(matches!(config.signal_pattern(), SignalPattern::Sine { .. }));

    let bridge = RunningBridge::start(config).await.unwrap();
    let mut client = connect(bridge.local_addr()).await;
    wait_for_clients(&bridge, 1).await;

    let spectrum = next_spectrum(&mut client).await;
    let peak = spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();

    // 440 Hz at 48 kHz with a 2048-point transform: bin 440 * 2048 / 48000 ≈ 18.8
    assert!((18..=19).contains(&peak), "peak at bin {}", peak);

    bridge.shutdown().await;
}

#[tokio::test]
#[allow(deprecated)]
async fn test_reset_client_does_not_disturb_survivor() {
    let bridge = RunningBridge::start(simulated_config()).await.unwrap();
    let addr = bridge.local_addr();

    let reset = connect(addr).await;
    let mut survivor = connect(addr).await;
    wait_for_clients(&bridge, 2).await;

    if let MaybeTlsStream::Plain(tcp) = reset.get_ref() {
        tcp.set_linger(Some(Duration::ZERO)).unwrap();
    }
    drop(reset);

    for _ in 0..10 {
        assert_eq!(next_spectrum(&mut survivor).await.len(), 128);
    }
    wait_for_clients(&bridge, 1).await;

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_stops() {
    let config = simulated_config();
    let grace = config.shutdown_grace();
    let bridge = RunningBridge::start(config).await.unwrap();
    let addr = bridge.local_addr();

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(addr).await);
    }
    wait_for_clients(&bridge, 3).await;

    let state = bridge.subscribe_state();
    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();
    let run = bridge.run_until(async move {
        let _ = signal_rx.await;
    });
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*state.borrow(), BridgeLifecycleState::Running);
        let signalled = Instant::now();
        signal_tx.send(()).unwrap();
        signalled
    };
    let ((reason, summary), signalled) = tokio::join!(run, trigger);

    assert_eq!(reason, ExitReason::Interrupted);
    assert!(signalled.elapsed() < grace, "shutdown took {:?}", signalled.elapsed());
    assert_eq!(*state.borrow(), BridgeLifecycleState::Stopped);
    assert!(summary.capture.frames_processed > 0);

    for client in &mut clients {
        let closed = loop {
            match tokio::time::timeout(Duration::from_secs(2), client.next()).await {
                Err(_) => break false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => break true,
                Ok(Some(Ok(_))) => continue,
            }
        };
        assert!(closed);
    }

    assert!(connect_async(format!("ws://{}", addr)).await.is_err());
}

#[tokio::test]
async fn test_unreachable_external_service_aborts_startup() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = simulated_config();
    config.external = Some(ExternalServiceConfig {
        host: "127.0.0.1".to_string(),
        port,
        password: String::new(),
        connect_timeout_ms: 500,
    });

    let err = RunningBridge::start(config).await.err().unwrap();
    assert!(matches!(err, BridgeError::ExternalService { .. }));
    assert!(err.is_fatal_startup());
}

#[tokio::test]
async fn test_reachable_external_service_is_held_for_the_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let service = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Runs until the bridge closes the link
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                return true;
            }
        }
        false
    });

    let mut config = simulated_config();
    config.external = Some(ExternalServiceConfig {
        host: "127.0.0.1".to_string(),
        port,
        password: "secret".to_string(),
        connect_timeout_ms: 1000,
    });

    let bridge = RunningBridge::start(config).await.unwrap();
    assert_eq!(bridge.state(), BridgeLifecycleState::Running);
    bridge.shutdown().await;

    assert!(service.await.unwrap());
}

#[tokio::test]
async fn test_device_loss_shuts_bridge_down() {
    let mut config = simulated_config();
    config.audio.simulate_signal = SimulatedSignal::Disconnect;
    config.audio.disconnect_after_frames = 5;

    let bridge = RunningBridge::start(config).await.unwrap();
    let state = bridge.subscribe_state();
    let mut client = connect(bridge.local_addr()).await;

    // The signal never fires; only the device loss can end the run
    let run = bridge.run_until(std::future::pending::<()>());
    let (reason, summary) = tokio::time::timeout(Duration::from_secs(3), run)
        .await
        .expect("bridge did not stop after device loss");

    assert!(matches!(reason, ExitReason::DeviceLost(_)));
    assert_eq!(summary.capture.frames_processed, 5);
    assert_eq!(*state.borrow(), BridgeLifecycleState::Stopped);

    let closed = loop {
        match tokio::time::timeout(Duration::from_secs(2), client.next()).await {
            Err(_) => break false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => break true,
            Ok(Some(Ok(_))) => continue,
        }
    };
    assert!(closed);
}

#[tokio::test]
async fn test_signal_ends_run_as_interrupt() {
    let bridge = RunningBridge::start(simulated_config()).await.unwrap();
    let state = bridge.subscribe_state();

    let (reason, _) = bridge
        .run_until(tokio::time::sleep(Duration::from_millis(50)))
        .await;

    assert_eq!(reason, ExitReason::Interrupted);
    assert_eq!(*state.borrow(), BridgeLifecycleState::Stopped);
}
