//! Session event stream.
//! Everything the session does lands here as a timestamped event, both
//! broadcast to live subscribers and retained for the log commands.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::bluetooth::types::{CharacteristicId, DeviceInfo};

/// One entry in the session log.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Local>,
    pub kind: EventKind,
}

/// What happened.
#[derive(Debug, Clone, Serialize)]
pub enum EventKind {
    Connected {
        device: DeviceInfo,
    },
    Disconnected {
        device: DeviceInfo,
    },
    ConnectFailed {
        device: DeviceInfo,
        reason: String,
    },
    ReadResult {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    WriteResult {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    Notification {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    NotifyStarted {
        characteristic: CharacteristicId,
    },
    NotifyStopped {
        characteristic: CharacteristicId,
    },
    NotifyError {
        characteristic: CharacteristicId,
        reason: String,
    },
    OperationRejected {
        operation: &'static str,
        target: Option<CharacteristicId>,
        reason: String,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S%.3f"), self.kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { device } => write!(f, "CONNECTED {}", device.label()),
            Self::Disconnected { device } => write!(f, "DISCONNECTED {}", device.label()),
            Self::ConnectFailed { device, reason } => {
                write!(f, "CONNECT FAILED {}: {reason}", device.label())
            }
            Self::ReadResult { characteristic, value } => {
                write!(f, "READ {characteristic} {}", format_value(value))
            }
            Self::WriteResult { characteristic, value } => {
                write!(f, "WRITE {characteristic} {}", format_value(value))
            }
            Self::Notification { characteristic, value } => {
                write!(f, "NOTIFY {characteristic} {}", format_value(value))
            }
            Self::NotifyStarted { characteristic } => write!(f, "NOTIFY ON {characteristic}"),
            Self::NotifyStopped { characteristic } => write!(f, "NOTIFY OFF {characteristic}"),
            Self::NotifyError { characteristic, reason } => {
                write!(f, "NOTIFY FAILED {characteristic}: {reason}")
            }
            Self::OperationRejected { operation, target, reason } => match target {
                Some(target) => write!(f, "REJECTED {operation} {target}: {reason}"),
                None => write!(f, "REJECTED {operation}: {reason}"),
            },
        }
    }
}

/// Renders a payload as hex pairs, with the ASCII text appended when every
/// byte is printable.
pub fn format_value(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0 bytes".into();
    }
    let hex = bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.iter().all(|b| (0x20..=0x7e).contains(b)) {
        let text: String = bytes.iter().map(|&b| b as char).collect();
        format!("{} bytes: {hex} \"{text}\"", bytes.len())
    } else {
        format!("{} bytes: {hex}", bytes.len())
    }
}

/// Fan-out point for session events.
///
/// Live subscribers get a broadcast stream; the full history stays
/// available for the `log` and `export` commands until cleared.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Arc<Mutex<Vec<Event>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Stamps `kind` with the current time, records it, and fans it out.
    /// Lapsed subscribers are not an error.
    pub fn emit(&self, kind: EventKind) {
        let event = Event {
            timestamp: Local::now(),
            kind,
        };
        self.history.lock().unwrap().push(event.clone());
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Snapshot of every event recorded since the last clear.
    pub fn history(&self) -> Vec<Event> {
        self.history.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.history.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants;

    fn sample_id() -> CharacteristicId {
        CharacteristicId {
            service: constants::UUID_DEVICE_INFORMATION_SERVICE,
            characteristic: constants::UUID_MANUFACTURER_NAME,
        }
    }

    #[test]
    fn format_value_appends_ascii_when_printable() {
        assert_eq!(format_value(b"v1.0"), "4 bytes: 76 31 2e 30 \"v1.0\"");
        assert_eq!(format_value(&[0x01, 0xff]), "2 bytes: 01 ff");
        assert_eq!(format_value(&[]), "0 bytes");
    }

    #[test]
    fn event_lines_carry_timestamp_and_kind() {
        let event = Event {
            timestamp: Local::now(),
            kind: EventKind::ReadResult {
                characteristic: sample_id(),
                value: b"v1.0".to_vec(),
            },
        };
        let line = event.to_string();
        assert!(line.starts_with('['));
        assert!(line.contains("READ 180a/2a29 4 bytes: 76 31 2e 30 \"v1.0\""));
    }

    #[test]
    fn rejected_line_includes_target_when_known() {
        let kind = EventKind::OperationRejected {
            operation: "read",
            target: Some(sample_id()),
            reason: "characteristic does not support read".into(),
        };
        assert_eq!(
            kind.to_string(),
            "REJECTED read 180a/2a29: characteristic does not support read"
        );
    }

    #[test]
    fn bus_retains_history_until_cleared() {
        let bus = EventBus::new(8);
        bus.emit(EventKind::NotifyStarted {
            characteristic: sample_id(),
        });
        bus.emit(EventKind::NotifyStopped {
            characteristic: sample_id(),
        });
        assert_eq!(bus.history().len(), 2);
        bus.clear();
        assert!(bus.history().is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(EventKind::NotifyStarted {
            characteristic: sample_id(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::NotifyStarted { .. }));
    }
}
