//! Wire protocol between the control plane and the browser frontend.
//!
//! Newline-terminated UTF-8 text lines, one message per line.
//! Outbound: `load <url>`, `reset`, `status`, `playSwitch`, `rewind`,
//! `forward`, `shutdown`.
//! Inbound: `log <level> <text>`, `readout <text>`, `playing`, `paused`,
//! `finished`, `loaded <url>`, `unloaded`, `network`.

use crate::domain::error::ControlError;
use std::fmt;

/// Command sent to the browser frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load(String),
    Reset,
    Status,
    PlaySwitch,
    Rewind,
    Forward,
    Shutdown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Load(url) => write!(f, "load {url}"),
            Command::Reset => write!(f, "reset"),
            Command::Status => write!(f, "status"),
            Command::PlaySwitch => write!(f, "playSwitch"),
            Command::Rewind => write!(f, "rewind"),
            Command::Forward => write!(f, "forward"),
            Command::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Browser log severities forwarded into the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl BrowserLogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Message received from the browser frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserMessage {
    Log { level: BrowserLogLevel, text: String },
    Readout { text: String },
    Playing,
    Paused,
    Finished,
    Loaded { url: String },
    Unloaded,
    Network,
}

impl BrowserMessage {
    /// Parse one protocol line. Unknown first tokens are protocol errors.
    pub fn parse(line: &str) -> Result<Self, ControlError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (head, rest) = match line.split_once(' ') {
            Some((head, rest)) => (head, Some(rest)),
            None => (line, None),
        };

        match (head, rest) {
            ("log", Some(rest)) => {
                let (level, text) = rest
                    .split_once(' ')
                    .ok_or_else(|| ControlError::protocol(format!("log without text: {line}")))?;
                let level = BrowserLogLevel::parse(level)
                    .ok_or_else(|| ControlError::protocol(format!("bad log level: {level}")))?;
                Ok(Self::Log { level, text: text.to_string() })
            }
            ("readout", Some(text)) => Ok(Self::Readout { text: text.to_string() }),
            ("playing", None) => Ok(Self::Playing),
            ("paused", None) => Ok(Self::Paused),
            ("finished", None) => Ok(Self::Finished),
            ("loaded", Some(url)) => Ok(Self::Loaded { url: url.to_string() }),
            ("unloaded", None) => Ok(Self::Unloaded),
            ("network", None) => Ok(Self::Network),
            _ => Err(ControlError::protocol(format!("unknown command: {line}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_format() {
        assert_eq!(Command::Load("https://a.com/x".into()).to_string(), "load https://a.com/x");
        assert_eq!(Command::PlaySwitch.to_string(), "playSwitch");
        assert_eq!(Command::Shutdown.to_string(), "shutdown");
    }

    #[test]
    fn test_parse_simple_messages() {
        assert_eq!(BrowserMessage::parse("playing").unwrap(), BrowserMessage::Playing);
        assert_eq!(BrowserMessage::parse("paused").unwrap(), BrowserMessage::Paused);
        assert_eq!(BrowserMessage::parse("finished\r\n").unwrap(), BrowserMessage::Finished);
        assert_eq!(BrowserMessage::parse("network").unwrap(), BrowserMessage::Network);
    }

    #[test]
    fn test_parse_loaded() {
        assert_eq!(
            BrowserMessage::parse("loaded https://a.com/x").unwrap(),
            BrowserMessage::Loaded { url: "https://a.com/x".to_string() }
        );
    }

    #[test]
    fn test_parse_log() {
        assert_eq!(
            BrowserMessage::parse("log warn player stalled").unwrap(),
            BrowserMessage::Log {
                level: BrowserLogLevel::Warn,
                text: "player stalled".to_string()
            }
        );
        assert!(BrowserMessage::parse("log nope text").is_err());
        assert!(BrowserMessage::parse("log warn").is_err());
    }

    #[test]
    fn test_parse_readout_keeps_whole_text() {
        assert_eq!(
            BrowserMessage::parse("readout chapter two the sea").unwrap(),
            BrowserMessage::Readout { text: "chapter two the sea".to_string() }
        );
    }

    #[test]
    fn test_parse_unknown_is_error() {
        assert!(BrowserMessage::parse("frobnicate").is_err());
        assert!(BrowserMessage::parse("playing now").is_err());
        assert!(BrowserMessage::parse("").is_err());
    }
}
