//! Host-level actions: mixer volume, power off, browser supervision

use tracing::{info, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

pub struct System {
    volume_step: u8,
    display: u8,
    #[cfg(test)]
    mock_enabled: bool,
    #[cfg(test)]
    calls: parking_lot::Mutex<Vec<String>>,
    #[cfg(test)]
    mock_browser_alive: AtomicBool,
}

impl System {
    pub fn new(volume_step: u8, display: u8) -> Self {
        Self {
            volume_step,
            display,
            #[cfg(test)]
            mock_enabled: false,
            #[cfg(test)]
            calls: parking_lot::Mutex::new(Vec::new()),
            #[cfg(test)]
            mock_browser_alive: AtomicBool::new(true),
        }
    }

    #[cfg(test)]
    pub fn new_mock(volume_step: u8, display: u8) -> Self {
        Self { mock_enabled: true, ..Self::new(volume_step, display) }
    }

    #[cfg(test)]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    #[cfg(test)]
    pub fn set_browser_alive(&self, alive: bool) {
        self.mock_browser_alive.store(alive, Ordering::SeqCst);
    }

    async fn adjust_volume(&self, suffix: char) {
        let step = format!("{}%{}", self.volume_step, suffix);
        #[cfg(test)]
        if self.mock_enabled {
            self.calls.lock().push(format!("amixer {step}"));
            return;
        }
        let status = tokio::process::Command::new("amixer")
            .args(["-q", "sset", "Master", &step])
            .status()
            .await;
        match status {
            Ok(status) if status.success() => info!(event = "volume_adjusted", step = %step),
            Ok(status) => warn!(event = "volume_adjust_failed", code = ?status.code()),
            Err(e) => warn!(event = "volume_adjust_failed", error = %e),
        }
    }

    pub async fn volume_up(&self) {
        self.adjust_volume('+').await;
    }

    pub async fn volume_down(&self) {
        self.adjust_volume('-').await;
    }

    /// Halt the machine. Only returns on failure.
    pub async fn power_off(&self) {
        info!(event = "power_off_requested");
        #[cfg(test)]
        if self.mock_enabled {
            self.calls.lock().push("shutdown".to_string());
            return;
        }
        if let Err(e) = tokio::process::Command::new("shutdown").args(["-h", "now"]).status().await
        {
            warn!(event = "power_off_failed", error = %e);
        }
    }

    /// True when a chromium process is running.
    pub async fn browser_alive(&self) -> bool {
        #[cfg(test)]
        if self.mock_enabled {
            self.calls.lock().push("pgrep".to_string());
            return self.mock_browser_alive.load(Ordering::SeqCst);
        }
        tokio::process::Command::new("pgrep")
            .args(["-f", "chromium"])
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Start the kiosk browser detached from this process.
    pub fn relaunch_browser(&self) {
        info!(event = "browser_relaunch", display = self.display);
        #[cfg(test)]
        if self.mock_enabled {
            self.calls.lock().push("relaunch".to_string());
            return;
        }
        let mut cmd = std::process::Command::new("chromium-browser");
        cmd.arg("--kiosk")
            .env("DISPLAY", format!(":{}", self.display))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        // survive our own shutdown
        #[cfg(unix)]
        cmd.process_group(0);
        if let Err(e) = cmd.spawn() {
            warn!(event = "browser_relaunch_failed", error = %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let system = System::new_mock(5, 1);
        system.volume_up().await;
        system.volume_down().await;
        system.power_off().await;
        system.relaunch_browser();
        assert_eq!(system.calls(), vec!["amixer 5%+", "amixer 5%-", "shutdown", "relaunch"]);
    }

    #[tokio::test]
    async fn test_mock_browser_alive_toggle() {
        let system = System::new_mock(5, 1);
        assert!(system.browser_alive().await);
        system.set_browser_alive(false);
        assert!(!system.browser_alive().await);
    }
}
