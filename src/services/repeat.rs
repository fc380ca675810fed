//! Periodic maintenance commands
//!
//! Each `[[command]]` entry from the config runs on its own interval until
//! shutdown. A failing or hanging command stops its own schedule unless
//! `repeat_on_error` is set; the rest keep running.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::infra::config::RepeatCommandConfig;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

pub fn spawn_repeaters(
    commands: &[RepeatCommandConfig],
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    commands
        .iter()
        .cloned()
        .map(|cfg| {
            let shutdown = shutdown.clone();
            tokio::spawn(run_repeater(cfg, shutdown))
        })
        .collect()
}

async fn run_repeater(cfg: RepeatCommandConfig, mut shutdown: watch::Receiver<bool>) {
    info!(event = "repeater_started", name = %cfg.name, interval_secs = cfg.interval_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately, skip it so the command starts one
    // interval after boot
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        if !run_once(&cfg).await && !cfg.repeat_on_error {
            warn!(event = "repeater_stopped_on_error", name = %cfg.name);
            return;
        }
    }
    debug!(event = "repeater_stopped", name = %cfg.name);
}

async fn run_once(cfg: &RepeatCommandConfig) -> bool {
    let run = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&cfg.command)
        .kill_on_drop(true)
        .status();
    match tokio::time::timeout(COMMAND_TIMEOUT, run).await {
        Ok(Ok(status)) if status.success() => {
            debug!(event = "repeater_ran", name = %cfg.name);
            true
        }
        Ok(Ok(status)) => {
            warn!(event = "repeater_failed", name = %cfg.name, code = ?status.code());
            false
        }
        Ok(Err(e)) => {
            warn!(event = "repeater_failed", name = %cfg.name, error = %e);
            false
        }
        Err(_) => {
            warn!(event = "repeater_timeout", name = %cfg.name);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, command: &str, repeat_on_error: bool) -> RepeatCommandConfig {
        RepeatCommandConfig {
            name: name.to_string(),
            command: command.to_string(),
            interval_secs: 1,
            repeat_on_error,
        }
    }

    #[tokio::test]
    async fn test_run_once_success_and_failure() {
        assert!(run_once(&cfg("ok", "true", false)).await);
        assert!(!run_once(&cfg("bad", "false", false)).await);
    }

    #[tokio::test]
    async fn test_run_once_times_out() {
        assert!(!run_once(&cfg("slow", "sleep 10", false)).await);
    }

    #[tokio::test]
    async fn test_failing_repeater_stops_itself() {
        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_repeater(cfg("failing", "false", false), rx));
        // task ends on its own after the first failed run
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("repeater kept running")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_repeaters() {
        let (tx, rx) = watch::channel(false);
        let handles = spawn_repeaters(&[cfg("idle", "true", true)], rx);
        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("repeater did not stop")
                .unwrap();
        }
    }
}
