//! Audio prompts and speech output
//!
//! Prompts play through `aplay`, speech through `espeak`, both driven via
//! `sh -c` so an optional start delay can be prefixed as a `sleep`. Only
//! one playback runs at a time; a request arriving while busy is refused
//! rather than queued.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Local audio output. Implementations must be cheap to clone behind an
/// `Arc` and safe to call from blocking worker threads.
pub trait Synthesizer: Send + Sync {
    /// Play a sound file, optionally delayed. Returns false when playback
    /// could not start or, for synchronous playback, did not finish cleanly.
    fn play_sound(&self, file: &Path, delay_secs: f64, synchronous: bool) -> bool;

    /// Speak a line of text in the given language.
    fn play_text(&self, text: &str, lang: &str, delay_secs: f64, synchronous: bool) -> bool;

    /// Kill whatever is currently playing.
    fn stop_playback(&self);
}

/// Shell-backed synthesizer used on the appliance.
pub struct ShellSynthesizer {
    player: String,
    speaker: String,
    busy: Arc<AtomicBool>,
    current: Arc<Mutex<Option<u32>>>,
}

impl Default for ShellSynthesizer {
    fn default() -> Self {
        Self::with_programs("aplay -q", "espeak")
    }
}

impl ShellSynthesizer {
    pub fn with_programs(player: &str, speaker: &str) -> Self {
        Self {
            player: player.to_string(),
            speaker: speaker.to_string(),
            busy: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    fn run(&self, command: String, synchronous: bool) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(event = "playback_busy", command = %command);
            return false;
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        // own process group so stop_playback can kill sh and its children
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(event = "playback_spawn_failed", command = %command, error = %e);
                self.busy.store(false, Ordering::Release);
                return false;
            }
        };
        *self.current.lock() = Some(child.id());

        let busy = self.busy.clone();
        let current = self.current.clone();
        let reap = move |mut child: std::process::Child| {
            let clean = child.wait().map(|status| status.success()).unwrap_or(false);
            *current.lock() = None;
            busy.store(false, Ordering::Release);
            clean
        };

        if synchronous {
            reap(child)
        } else {
            std::thread::spawn(move || {
                reap(child);
            });
            true
        }
    }
}

fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn with_delay(delay_secs: f64, command: String) -> String {
    if delay_secs > 0.0 {
        format!("sleep {delay_secs}; {command}")
    } else {
        command
    }
}

impl Synthesizer for ShellSynthesizer {
    fn play_sound(&self, file: &Path, delay_secs: f64, synchronous: bool) -> bool {
        let command = with_delay(
            delay_secs,
            format!("{} {}", self.player, sh_quote(&file.display().to_string())),
        );
        debug!(event = "play_sound", file = %file.display());
        self.run(command, synchronous)
    }

    fn play_text(&self, text: &str, lang: &str, delay_secs: f64, synchronous: bool) -> bool {
        let command = with_delay(
            delay_secs,
            format!("{} -v {} {}", self.speaker, sh_quote(lang), sh_quote(text)),
        );
        debug!(event = "play_text", lang = %lang);
        self.run(command, synchronous)
    }

    fn stop_playback(&self) {
        let pid = self.current.lock().take();
        if let Some(pid) = pid {
            debug!(event = "playback_stopped", pid);
            // negative pid addresses the whole process group
            let _ = Command::new("kill")
                .args(["-TERM", &format!("-{pid}")])
                .stderr(Stdio::null())
                .status();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_sh_quote_escapes_single_quotes() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_with_delay_prefixes_sleep() {
        assert_eq!(with_delay(0.0, "true".into()), "true");
        assert_eq!(with_delay(1.5, "true".into()), "sleep 1.5; true");
    }

    #[test]
    fn test_synchronous_run_reports_exit_status() {
        let synth = ShellSynthesizer::with_programs("true", "true");
        assert!(synth.run("true".into(), true));
        assert!(!synth.run("false".into(), true));
    }

    #[test]
    fn test_busy_refuses_second_playback() {
        let synth = ShellSynthesizer::with_programs("true", "true");
        assert!(synth.run("sleep 2".into(), false));
        assert!(!synth.run("true".into(), true));
        synth.stop_playback();
    }

    #[test]
    fn test_stop_playback_kills_running_command() {
        let synth = ShellSynthesizer::with_programs("true", "true");
        assert!(synth.run("sleep 10".into(), false));
        synth.stop_playback();
        let start = Instant::now();
        while synth.busy.load(Ordering::Acquire) {
            assert!(start.elapsed() < Duration::from_secs(2), "playback not reaped");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
