//! Operator commands
//! This module parses REPL lines and routes them to the session, the
//! scanner and the event log.

use anyhow::{Result, anyhow, bail};
use log::debug;
use std::path::Path;
use uuid::Uuid;

use crate::core::bluetooth::{
    CharacteristicId, CommandError, DeviceInfo, PayloadEncoding, parse_uuid, sig_id,
};
use crate::state::AppState;
use crate::utils::ensure_directory_exists;

pub const HELP: &str = "\
Commands:
  scan                      start scanning for devices
  scan stop                 stop scanning
  devices                   list discovered devices
  connect <n|address|id>    connect to a device from the list
  disconnect                disconnect the current device
  services                  show the GATT tree of the connected device
  read <svc> <char>         read a characteristic value
  write <svc> <char> text|hex <payload>
                            write a payload to a characteristic
  notify <svc> <char> on|off
                            start or stop notifications
  status                    show session state
  log [n]                   print the event log (last n entries)
  export <path>             write the event log to a file
  clear                     clear the event log
  help                      this text
  quit                      exit

UUIDs accept the 16-bit short form (180a, 2a29) or the full form.";

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    ScanStart,
    ScanStop,
    Devices,
    Connect(String),
    Disconnect,
    Services,
    Read(CharacteristicId),
    Write {
        target: CharacteristicId,
        encoding: PayloadEncoding,
        payload: String,
    },
    Notify {
        target: CharacteristicId,
        enable: bool,
    },
    Status,
    Log(Option<usize>),
    Export(String),
    Clear,
    Help,
    Quit,
}

/// Parses one input line. Empty lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<ReplCommand>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&first) = tokens.first() else {
        return Ok(None);
    };

    let parsed = match first.to_ascii_lowercase().as_str() {
        "scan" => match tokens.get(1) {
            None => ReplCommand::ScanStart,
            Some(&"stop") => ReplCommand::ScanStop,
            Some(other) => bail!("unknown scan subcommand `{other}` (try `scan` or `scan stop`)"),
        },
        "devices" | "list" => ReplCommand::Devices,
        "connect" => {
            let selector = tokens
                .get(1)
                .ok_or_else(|| anyhow!("usage: connect <number|address|id>"))?;
            ReplCommand::Connect(selector.to_string())
        }
        "disconnect" => ReplCommand::Disconnect,
        "services" => ReplCommand::Services,
        "read" => ReplCommand::Read(parse_target(&tokens, "read <service> <characteristic>")?),
        "write" => {
            if tokens.len() < 5 {
                bail!("usage: write <service> <characteristic> <text|hex> <payload>");
            }
            let target = parse_target(&tokens, "write <service> <characteristic> <text|hex> <payload>")?;
            let encoding = tokens[3].parse::<PayloadEncoding>().map_err(|e| anyhow!(e))?;
            // Whitespace runs in a text payload collapse to single spaces.
            let payload = tokens[4..].join(" ");
            ReplCommand::Write {
                target,
                encoding,
                payload,
            }
        }
        "notify" => {
            if tokens.len() < 4 {
                bail!("usage: notify <service> <characteristic> <on|off>");
            }
            let target = parse_target(&tokens, "notify <service> <characteristic> <on|off>")?;
            let enable = match tokens[3].to_ascii_lowercase().as_str() {
                "on" => true,
                "off" => false,
                other => bail!("expected `on` or `off`, got `{other}`"),
            };
            ReplCommand::Notify { target, enable }
        }
        "status" => ReplCommand::Status,
        "log" => {
            let count = tokens
                .get(1)
                .map(|t| t.parse::<usize>())
                .transpose()
                .map_err(|_| anyhow!("usage: log [n]"))?;
            ReplCommand::Log(count)
        }
        "export" => {
            let path = tokens
                .get(1)
                .ok_or_else(|| anyhow!("usage: export <path>"))?;
            ReplCommand::Export(path.to_string())
        }
        "clear" => ReplCommand::Clear,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => bail!("unknown command `{other}`, try `help`"),
    };
    Ok(Some(parsed))
}

fn parse_target(tokens: &[&str], usage: &str) -> Result<CharacteristicId> {
    let (service, characteristic) = match (tokens.get(1), tokens.get(2)) {
        (Some(service), Some(characteristic)) => (service, characteristic),
        _ => bail!("usage: {usage}"),
    };
    let service =
        parse_uuid(service).ok_or_else(|| anyhow!("unrecognized service UUID `{service}`"))?;
    let characteristic = parse_uuid(characteristic)
        .ok_or_else(|| anyhow!("unrecognized characteristic UUID `{characteristic}`"))?;
    Ok(CharacteristicId {
        service,
        characteristic,
    })
}

/// Executes one command against the application state. Returns `false`
/// when the REPL should exit.
pub async fn dispatch(command: ReplCommand, state: &AppState) -> Result<bool> {
    match command {
        ReplCommand::ScanStart => {
            state.scanner.lock().await.start_scan().await?;
            println!("Scanning... use `devices` to list findings.");
        }
        ReplCommand::ScanStop => {
            state.scanner.lock().await.stop_scan().await;
            println!("Scan stopped.");
        }
        ReplCommand::Devices => {
            let devices = state.scanner.lock().await.snapshot();
            if devices.is_empty() {
                println!("No devices discovered yet.");
            }
            for (index, device) in devices.iter().enumerate() {
                let rssi = device
                    .rssi
                    .map(|r| format!("{r} dBm"))
                    .unwrap_or_else(|| "n/a".to_string());
                println!("{:>3}. {}  (RSSI: {rssi})", index + 1, device.label());
            }
        }
        ReplCommand::Connect(selector) => {
            let device = resolve_device(state, &selector).await?;
            // Radios dislike scanning and connecting at once.
            state.scanner.lock().await.stop_scan().await;
            println!("Connecting to {}...", device.label());
            check_session(state.session.connect(device).await)?;
        }
        ReplCommand::Disconnect => {
            check_session(state.session.disconnect().await)?;
        }
        ReplCommand::Services => {
            let services = state.session.services().await?;
            if services.is_empty() {
                println!("No services. Connect to a device first.");
            }
            for service in &services {
                println!(
                    "service {}  {}",
                    uuid_column(&service.uuid),
                    service.description.unwrap_or("(unknown)")
                );
                for characteristic in &service.characteristics {
                    println!(
                        "  {}  {}  [{}]",
                        uuid_column(&characteristic.id.characteristic),
                        characteristic.description.unwrap_or("(unknown)"),
                        characteristic.properties
                    );
                }
            }
        }
        ReplCommand::Read(target) => {
            check_session(state.session.read(target).await)?;
        }
        ReplCommand::Write {
            target,
            encoding,
            payload,
        } => {
            check_session(state.session.write(target, payload, encoding).await)?;
        }
        ReplCommand::Notify { target, enable } => {
            check_session(state.session.set_notify(target, enable).await)?;
        }
        ReplCommand::Status => {
            let status = state.session.status().await?;
            println!("state: {}", status.state);
            match &status.device {
                Some(device) => println!("device: {}", device.label()),
                None => println!("device: none"),
            }
            println!(
                "services: {} ({} characteristics)",
                status.service_count, status.characteristic_count
            );
            if status.subscriptions.is_empty() {
                println!("subscriptions: none");
            } else {
                let subscriptions: Vec<String> = status
                    .subscriptions
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                println!("subscriptions: {}", subscriptions.join(", "));
            }
            let scanning = state.scanner.lock().await.is_scanning();
            println!("scanning: {}", if scanning { "yes" } else { "no" });
        }
        ReplCommand::Log(count) => {
            let events = state.events.history();
            if events.is_empty() {
                println!("Log is empty.");
            }
            let start = count
                .map(|count| events.len().saturating_sub(count))
                .unwrap_or(0);
            for event in &events[start..] {
                println!("{event}");
            }
        }
        ReplCommand::Export(path) => {
            let count = export_log(state, Path::new(&path)).await?;
            println!("Exported {count} events to {path}");
        }
        ReplCommand::Clear => {
            state.events.clear();
            println!("Log cleared.");
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Session results are reported through the event stream; only a dead
/// session task is worth surfacing here.
fn check_session<T>(result: Result<T, CommandError>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(CommandError::SessionClosed) => Err(CommandError::SessionClosed.into()),
        Err(e) => {
            debug!("Session rejected the command: {e}");
            Ok(())
        }
    }
}

/// Short column form for UUIDs the operator can feed back into commands.
fn uuid_column(uuid: &Uuid) -> String {
    match sig_id(uuid) {
        Some(short) => format!("{short:04x}"),
        None => uuid.to_string(),
    }
}

/// Resolves a `connect` selector: a 1-based index into the device list,
/// a MAC address, or a platform device id.
async fn resolve_device(state: &AppState, selector: &str) -> Result<DeviceInfo> {
    let devices = state.scanner.lock().await.snapshot();
    if let Ok(index) = selector.parse::<usize>() {
        let slot = index
            .checked_sub(1)
            .ok_or_else(|| anyhow!("device numbers start at 1"))?;
        return devices
            .get(slot)
            .cloned()
            .ok_or_else(|| anyhow!("no device #{index}; run `devices`"));
    }
    devices
        .iter()
        .find(|d| d.id == selector || d.address.eq_ignore_ascii_case(selector))
        .cloned()
        .ok_or_else(|| anyhow!("no discovered device matches `{selector}`"))
}

/// Writes the event log to `path`, one line per event.
async fn export_log(state: &AppState, path: &Path) -> Result<usize> {
    let events = state.events.history();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_directory_exists(parent).await?;
    }
    let mut contents = events
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    contents.push('\n');
    tokio::fs::write(path, contents).await?;
    Ok(events.len())
}
