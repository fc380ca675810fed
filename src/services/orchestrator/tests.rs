use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::handlers::sanitize_readout;
use super::*;
use crate::domain::Card;
use crate::hw::mock::MockOutput;
use crate::infra::ActorLoop;
use crate::io::reader::ReaderEvent;
use crate::io::transport::Transport;
use crate::services::sound::Synthesizer;

/// Synthesizer that records calls instead of spawning players.
#[derive(Default)]
struct RecordingSynth {
    calls: parking_lot::Mutex<Vec<String>>,
    text_failures: AtomicU32,
}

impl RecordingSynth {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn fail_text_times(&self, n: u32) {
        self.text_failures.store(n, Ordering::SeqCst);
    }
}

impl Synthesizer for RecordingSynth {
    fn play_sound(&self, file: &Path, _delay_secs: f64, _synchronous: bool) -> bool {
        let name = file.file_stem().and_then(|s| s.to_str()).unwrap_or("?").to_string();
        self.calls.lock().push(format!("sound {name}"));
        true
    }

    fn play_text(&self, text: &str, _lang: &str, _delay_secs: f64, _synchronous: bool) -> bool {
        let failures = self.text_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.text_failures.store(failures - 1, Ordering::SeqCst);
            self.calls.lock().push("busy".to_string());
            return false;
        }
        self.calls.lock().push(format!("speak {text}"));
        true
    }

    fn stop_playback(&self) {
        self.calls.lock().push("stop".to_string());
    }
}

struct Harness {
    events: EventSender,
    transport: Arc<Transport>,
    synth: Arc<RecordingSynth>,
    system: Arc<System>,
    led_pin: MockOutput,
    led_actor: ActorLoop,
    shutdown: watch::Sender<bool>,
    runner: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(offline_dir: &Path) -> Self {
        let config = test_config(offline_dir);
        let (events, rx) = event_channel();
        let transport_tx = events.clone();
        let transport = Arc::new(
            Transport::start("127.0.0.1", 0, move |ev| {
                let _ = transport_tx.send(ControlEvent::Transport(ev));
            })
            .expect("bind test transport"),
        );
        let led_actor = ActorLoop::spawn("orch-test-led");
        let led_pin = MockOutput::new();
        let led = StatusLed::new(Box::new(led_pin.clone()), led_actor.clone());
        let synth = Arc::new(RecordingSynth::default());
        let system = Arc::new(System::new_mock(5, 1));
        let (shutdown, _) = watch::channel(false);

        let orchestrator = Orchestrator::new(
            config,
            transport.clone(),
            led,
            synth.clone(),
            system.clone(),
            events.clone(),
            shutdown.clone(),
        );
        let runner = tokio::spawn(orchestrator.run(rx));
        Self { events, transport, synth, system, led_pin, led_actor, shutdown, runner }
    }

    async fn connect_peer(&self) -> BufReader<TcpStream> {
        let mut stream = TcpStream::connect(self.transport.local_addr()).await.unwrap();
        stream.write_all(b"hello\n").await.unwrap();
        wait_until(|| self.transport.has_peer()).await;
        BufReader::new(stream)
    }

    fn card(&self, content: &str) {
        let card = Card::new(vec![1, 2, 3, 4], content.to_string());
        self.events.send(ControlEvent::Reader(ReaderEvent::CardDetected(card))).unwrap();
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(2), self.runner).await;
        self.transport.stop();
        self.led_actor.stop();
    }
}

fn test_config(offline_dir: &Path) -> Config {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        format!(
            r#"
[appliance]
offline_dir = "{}"
offline_port = 9000
ready_repeat_secs = 0.0

[browser]
check_secs = 0.0
recheck_secs = 0.0

[transport]
readout_retry_secs = 0.05
readout_retries = 2
"#,
            offline_dir.display()
        ),
    )
    .unwrap();
    Config::from_file(file.path()).unwrap()
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("no line from orchestrator")
        .unwrap();
    line.trim_end().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_card_loads_content_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("books")).unwrap();
    std::fs::write(dir.path().join("books/one.mp3"), b"x").unwrap();

    let harness = Harness::start(dir.path());
    let mut peer = harness.connect_peer().await;

    harness.card("offline://books/one.mp3");
    assert_eq!(read_line(&mut peer).await, "load http://127.0.0.1:9000/books/one.mp3");

    // the same card again must not reload
    harness.card("offline://books/one.mp3");
    harness.card("https://example.com/other");
    assert_eq!(read_line(&mut peer).await, "load https://example.com/other");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offline_falls_back_to_online_when_file_missing() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());
    let mut peer = harness.connect_peer().await;

    harness.card("offline://books/gone.mp3;https://example.com/book");
    assert_eq!(read_line(&mut peer).await, "load https://example.com/book");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unusable_card_plays_error_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());
    let _peer = harness.connect_peer().await;

    harness.card("not a url at all");
    wait_until(|| harness.synth.calls().contains(&"sound error".to_string())).await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_failure_plays_error_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());

    harness.events.send(ControlEvent::Reader(ReaderEvent::CardReadFailed)).unwrap();
    wait_until(|| harness.synth.calls().contains(&"sound error".to_string())).await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_connect_plays_ready_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());
    let _peer = harness.connect_peer().await;

    wait_until(|| harness.synth.calls().contains(&"sound ready".to_string())).await;
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readout_is_sanitized_and_retried() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());
    harness.synth.fail_text_times(1);

    harness
        .events
        .send(ControlEvent::Transport(crate::io::TransportEvent::Message(
            crate::domain::BrowserMessage::Readout { text: "Chapter\t2:  The Sea!".to_string() },
        )))
        .unwrap();

    wait_until(|| harness.synth.calls().contains(&"speak Chapter 2 The Sea".to_string())).await;
    assert!(harness.synth.calls().contains(&"busy".to_string()));
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_volume_steps_hit_the_mixer() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());

    harness.events.send(ControlEvent::VolumeStep(Rotation::Clockwise)).unwrap();
    harness.events.send(ControlEvent::VolumeStep(Rotation::CounterClockwise)).unwrap();
    wait_until(|| harness.system.calls().len() >= 2).await;
    assert_eq!(harness.system.calls(), vec!["amixer 5%+", "amixer 5%-"]);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_button_press_forwards_play_switch() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());
    let mut peer = harness.connect_peer().await;

    harness.events.send(ControlEvent::PlayPausePressed).unwrap();
    assert_eq!(read_line(&mut peer).await, "playSwitch");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_playing_after_pause_sets_led_steady() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());
    let _peer = harness.connect_peer().await;

    harness
        .events
        .send(ControlEvent::Transport(crate::io::TransportEvent::Message(
            crate::domain::BrowserMessage::Playing,
        )))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.led_pin.last(), Some(crate::hw::Level::High));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_notifies_peer_and_powers_off() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path());
    let mut peer = harness.connect_peer().await;

    harness.events.send(ControlEvent::ShutdownRequested).unwrap();
    let line = read_line(&mut peer).await;
    assert_eq!(line, "shutdown");
    wait_until(|| harness.system.calls().contains(&"shutdown".to_string())).await;

    harness.stop().await;
}

#[test]
fn test_sanitize_readout() {
    assert_eq!(sanitize_readout("Chapter\t2:  The Sea!"), "Chapter 2 The Sea");
    assert_eq!(sanitize_readout("  plain words  "), "plain words");
    assert_eq!(sanitize_readout("?!*"), "");
    assert_eq!(sanitize_readout("line\nbreaks\ncollapse"), "line breaks collapse");
}
