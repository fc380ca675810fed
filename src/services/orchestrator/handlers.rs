//! Event handlers for the control loop

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, warn};

use super::{error_pattern, paused_pattern, ControlEvent, Orchestrator, TimerKey};
use crate::domain::card::select_url;
use crate::domain::{BrowserLogLevel, BrowserMessage, Card, Command};
use crate::io::reader::ReaderEvent;
use crate::io::transport::TransportEvent;
use crate::io::Rotation;

impl Orchestrator {
    pub(super) async fn handle(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Reader(event) => self.handle_reader(event).await,
            ControlEvent::Transport(event) => self.handle_transport(event).await,
            ControlEvent::PlayPausePressed => self.forward_command(Command::PlaySwitch).await,
            ControlEvent::RewindPressed => self.forward_command(Command::Rewind).await,
            ControlEvent::ForwardPressed => self.forward_command(Command::Forward).await,
            ControlEvent::VolumeStep(rotation) => match rotation {
                Rotation::Clockwise => self.system.volume_up().await,
                Rotation::CounterClockwise => self.system.volume_down().await,
            },
            ControlEvent::ShutdownRequested => self.handle_shutdown().await,
            ControlEvent::ReadyPromptDue => self.handle_ready_prompt(),
            ControlEvent::BrowserCheckDue => self.handle_browser_check().await,
            ControlEvent::StatusRecheckDue => self.handle_status_recheck().await,
            ControlEvent::ReadoutRetryDue { text, attempts } => self.speak(text, attempts),
        }
    }

    async fn handle_reader(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::CardDetected(card) => self.handle_card(card).await,
            ReaderEvent::CardReadFailed => {
                self.prompt("error");
            }
            ReaderEvent::CardRemoved => {
                debug!(event = "card_removed_noted");
            }
            ReaderEvent::Fatal(msg) => {
                error!(event = "reader_fatal", error = %msg);
                self.led.start_pattern(error_pattern(), None);
                self.prompt("error");
            }
        }
    }

    async fn handle_card(&mut self, card: Card) {
        info!(event = "card_accepted", uid = %card.uid_hex());
        let offline_root = self
            .config
            .use_offline()
            .then(|| self.config.offline_dir().to_path_buf());
        let Some(url) = select_url(card.content(), offline_root.as_deref()) else {
            warn!(event = "card_without_usable_url", uid = %card.uid_hex());
            self.prompt("error");
            return;
        };
        let target = self.resolve_target(&url);
        if self.state.current_url.as_deref() == Some(target.as_str()) {
            debug!(event = "card_already_loaded", url = %target);
            return;
        }
        // a prompt still talking would play over the new content
        self.synth.stop_playback();
        if self.transport.send(Command::Load(target.clone())).await {
            info!(event = "content_load_sent", url = %target);
            self.state.current_url = Some(target);
            self.timers.cancel(TimerKey::Ready);
        } else {
            warn!(event = "content_load_undeliverable", url = %target);
            self.prompt("error");
        }
    }

    /// Offline URLs are served by our own file server; everything else goes
    /// to the browser untouched.
    fn resolve_target(&self, url: &str) -> String {
        match url.strip_prefix("offline://") {
            Some(rel) => {
                format!("http://127.0.0.1:{}/{}", self.config.offline_port(), rel)
            }
            None => url.to_string(),
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected => {
                info!(event = "frontend_connected");
                self.led.set(true);
                self.prompt("ready");
                self.schedule_ready_repeat();
                if self.config.browser_recheck_secs() > 0.0 {
                    self.timers.set(
                        TimerKey::StatusRecheck,
                        Duration::from_secs_f64(self.config.browser_recheck_secs()),
                        ControlEvent::StatusRecheckDue,
                    );
                }
            }
            TransportEvent::PeerDisconnected => {
                info!(event = "frontend_disconnected");
                self.state = Default::default();
                self.timers.cancel(TimerKey::StatusRecheck);
                self.led.start_pattern(paused_pattern(), Some(false));
            }
            TransportEvent::Message(msg) => self.handle_message(msg).await,
        }
    }

    async fn handle_message(&mut self, msg: BrowserMessage) {
        match msg {
            BrowserMessage::Log { level, text } => match level {
                BrowserLogLevel::Debug => debug!(event = "frontend_log", text = %text),
                BrowserLogLevel::Info => info!(event = "frontend_log", text = %text),
                BrowserLogLevel::Warn => warn!(event = "frontend_log", text = %text),
                BrowserLogLevel::Error => error!(event = "frontend_log", text = %text),
            },
            BrowserMessage::Readout { text } => self.speak(text, 0),
            BrowserMessage::Playing => {
                self.state.paused = false;
                self.state.running = true;
                self.state.network_error = false;
                self.led.set(true);
                self.timers.cancel(TimerKey::Ready);
            }
            BrowserMessage::Paused => {
                self.state.paused = true;
                self.led.start_pattern(paused_pattern(), Some(true));
            }
            BrowserMessage::Finished => {
                info!(event = "playback_finished");
                self.state.running = false;
                self.state.paused = false;
                self.state.current_url = None;
                self.led.set(true);
                self.schedule_ready_repeat();
            }
            BrowserMessage::Loaded { url } => {
                info!(event = "content_loaded", url = %url);
                self.state.current_url = Some(url);
                self.state.running = true;
                self.state.network_error = false;
                self.led.set(true);
            }
            BrowserMessage::Unloaded => {
                debug!(event = "content_unloaded");
                self.state.current_url = None;
                self.state.running = false;
            }
            BrowserMessage::Network => {
                warn!(event = "frontend_network_error");
                self.state.network_error = true;
                self.prompt("network");
                self.led.start_pattern(error_pattern(), None);
                if self.config.browser_recheck_secs() > 0.0 {
                    self.timers.set(
                        TimerKey::StatusRecheck,
                        Duration::from_secs_f64(self.config.browser_recheck_secs()),
                        ControlEvent::StatusRecheckDue,
                    );
                }
            }
        }
    }

    async fn forward_command(&mut self, cmd: Command) {
        if !self.transport.send(cmd.clone()).await {
            debug!(event = "command_undeliverable", command = %cmd);
            self.prompt("error");
        }
    }

    async fn handle_shutdown(&mut self) {
        info!(event = "shutdown_initiated");
        self.synth.stop_playback();
        self.play_prompt_blocking("shutdown").await;
        let _ = self.transport.send(Command::Shutdown).await;
        self.peer_notified_shutdown = true;
        self.led.set(false);
        self.system.power_off().await;
        let _ = self.shutdown.send(true);
    }

    fn handle_ready_prompt(&mut self) {
        if !self.state.running && self.transport.has_peer() {
            self.prompt("ready");
        }
        self.schedule_ready_repeat();
    }

    fn schedule_ready_repeat(&mut self) {
        let secs = self.config.ready_repeat_secs();
        if secs > 0.0 && !self.state.running {
            self.timers.set(
                TimerKey::Ready,
                Duration::from_secs_f64(secs),
                ControlEvent::ReadyPromptDue,
            );
        }
    }

    async fn handle_browser_check(&mut self) {
        if !self.transport.has_peer() && !self.system.browser_alive().await {
            self.system.relaunch_browser();
        }
        let secs = self.config.browser_check_secs();
        if secs > 0.0 {
            self.timers.set(
                TimerKey::BrowserCheck,
                Duration::from_secs_f64(secs),
                ControlEvent::BrowserCheckDue,
            );
        }
    }

    async fn handle_status_recheck(&mut self) {
        if self.transport.has_peer() {
            let _ = self.transport.send(Command::Status).await;
            let secs = self.config.browser_recheck_secs();
            if secs > 0.0 {
                self.timers.set(
                    TimerKey::StatusRecheck,
                    Duration::from_secs_f64(secs),
                    ControlEvent::StatusRecheckDue,
                );
            }
        }
    }

    /// Fire-and-forget prompt playback in the configured language.
    pub(super) fn prompt(&self, name: &str) {
        let file = self.config.sound_file(name);
        if !self.synth.play_sound(&file, 0.0, false) {
            debug!(event = "prompt_skipped", prompt = %name);
        }
    }

    /// Prompt playback that completes before the caller continues, used for
    /// the shutdown farewell.
    async fn play_prompt_blocking(&self, name: &str) {
        let file = self.config.sound_file(name);
        let synth = self.synth.clone();
        let played = tokio::task::spawn_blocking(move || synth.play_sound(&file, 0.0, true)).await;
        if !played.unwrap_or(false) {
            debug!(event = "prompt_skipped", prompt = %name);
        }
    }

    /// Speak a readout line. When the synthesizer is busy the text is
    /// retried a limited number of times, then dropped without a sound.
    fn speak(&mut self, text: String, attempts: u32) {
        let clean = sanitize_readout(&text);
        if clean.is_empty() {
            return;
        }
        if self.synth.play_text(&clean, self.config.language(), 0.0, false) {
            return;
        }
        if attempts < self.config.readout_retries() {
            self.timers.set(
                TimerKey::ReadoutRetry,
                Duration::from_secs_f64(self.config.readout_retry_secs()),
                ControlEvent::ReadoutRetryDue { text, attempts: attempts + 1 },
            );
        } else {
            debug!(event = "readout_dropped", attempts);
        }
    }
}

/// Collapse whitespace and strip everything that is not a word character
/// before the text reaches the speech synthesizer.
pub(super) fn sanitize_readout(text: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    let invalid = INVALID.get_or_init(|| Regex::new(r"[^\w ]").expect("invalid char regex"));
    let spaced = ws.replace_all(text, " ");
    invalid.replace_all(&spaced, "").trim().to_string()
}
