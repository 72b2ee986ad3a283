//! Connection session state machine
//! One task owns the connection lifecycle and serializes every GATT
//! operation against the live link; callers go through `SessionHandle`
//! and watch results arrive on the event stream.

use std::fmt;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::core::bluetooth::constants::COMMAND_QUEUE_DEPTH;
use crate::core::bluetooth::error::{CommandError, TransportError};
use crate::core::bluetooth::events::{EventBus, EventKind};
use crate::core::bluetooth::notification::NotificationRouter;
use crate::core::bluetooth::registry::ServiceRegistry;
use crate::core::bluetooth::transport::{Link, LinkEvent, Transport, WriteMode};
use crate::core::bluetooth::types::{CharacteristicId, DeviceInfo, PayloadEncoding, ServiceInfo};

/// Connection lifecycle states.
///
/// `Connecting` and `Disconnecting` only exist inside a single command;
/// between commands the session rests at `Idle` or `Connected`. A failed
/// connect always lands back at `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        write!(f, "{name}")
    }
}

/// Snapshot of the session for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub device: Option<DeviceInfo>,
    pub service_count: usize,
    pub characteristic_count: usize,
    pub subscriptions: Vec<CharacteristicId>,
}

/// Commands accepted by the session task.
enum Command {
    Connect {
        device: DeviceInfo,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Read {
        target: CharacteristicId,
        reply: oneshot::Sender<Result<Vec<u8>, CommandError>>,
    },
    Write {
        target: CharacteristicId,
        payload: String,
        encoding: PayloadEncoding,
        reply: oneshot::Sender<Result<Vec<u8>, CommandError>>,
    },
    SetNotify {
        target: CharacteristicId,
        enable: bool,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Services {
        reply: oneshot::Sender<Vec<ServiceInfo>>,
    },
}

/// Cloneable handle to the session task.
///
/// Commands queue in submission order and are handled one at a time, so
/// concurrent callers can never interleave GATT traffic.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Connects to `device`, implicitly disconnecting any current device
    /// first. Resolves once discovery has finished or failed.
    pub async fn connect(&self, device: DeviceInfo) -> Result<(), CommandError> {
        self.request(|reply| Command::Connect { device, reply }).await?
    }

    /// Disconnects the current device. Succeeds quietly when nothing is
    /// connected.
    pub async fn disconnect(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Disconnect { reply }).await?
    }

    /// Reads the value of a characteristic.
    pub async fn read(&self, target: CharacteristicId) -> Result<Vec<u8>, CommandError> {
        self.request(move |reply| Command::Read { target, reply }).await?
    }

    /// Writes an operator-supplied payload to a characteristic and
    /// returns the decoded bytes that went out.
    pub async fn write(
        &self,
        target: CharacteristicId,
        payload: impl Into<String>,
        encoding: PayloadEncoding,
    ) -> Result<Vec<u8>, CommandError> {
        let payload = payload.into();
        self.request(move |reply| Command::Write {
            target,
            payload,
            encoding,
            reply,
        })
        .await?
    }

    /// Starts or stops notifications on a characteristic.
    pub async fn set_notify(
        &self,
        target: CharacteristicId,
        enable: bool,
    ) -> Result<(), CommandError> {
        self.request(move |reply| Command::SetNotify {
            target,
            enable,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<SessionStatus, CommandError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Current registry snapshot; empty unless connected.
    pub async fn services(&self) -> Result<Vec<ServiceInfo>, CommandError> {
        self.request(|reply| Command::Services { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)
    }
}

/// The session task. Owns the transport, the live link, the registry and
/// the subscription router; nothing else ever touches them.
pub struct Session {
    state: SessionState,
    device: Option<DeviceInfo>,
    registry: ServiceRegistry,
    router: NotificationRouter,
    transport: Box<dyn Transport>,
    link: Option<Box<dyn Link>>,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
    bus: EventBus,
    commands: mpsc::Receiver<Command>,
}

impl Session {
    /// Spawns the session task and returns the handle callers use.
    pub fn spawn(transport: Box<dyn Transport>, bus: EventBus) -> SessionHandle {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let session = Session {
            state: SessionState::Idle,
            device: None,
            registry: ServiceRegistry::new(),
            router: NotificationRouter::new(),
            transport,
            link: None,
            link_events: None,
            bus,
            commands: rx,
        };
        tokio::spawn(session.run());
        SessionHandle { commands: tx }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = Self::next_link_event(&mut self.link_events) => match event {
                    Some(LinkEvent::Lost) => self.handle_link_lost().await,
                    // Channel gone without a loss report; stop polling it.
                    None => self.link_events = None,
                },
            }
        }
        debug!("All session handles dropped, shutting down");
        if self.state == SessionState::Connected {
            self.teardown(false).await;
        }
    }

    async fn next_link_event(events: &mut Option<mpsc::Receiver<LinkEvent>>) -> Option<LinkEvent> {
        match events {
            Some(events) => events.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { device, reply } => {
                let _ = reply.send(self.connect(device).await);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::Read { target, reply } => {
                let result = self.read(&target).await;
                if let Err(e) = &result {
                    self.bus.emit(EventKind::OperationRejected {
                        operation: "read",
                        target: Some(target),
                        reason: e.to_string(),
                    });
                }
                let _ = reply.send(result);
            }
            Command::Write {
                target,
                payload,
                encoding,
                reply,
            } => {
                let result = self.write(&target, &payload, encoding).await;
                if let Err(e) = &result {
                    self.bus.emit(EventKind::OperationRejected {
                        operation: "write",
                        target: Some(target),
                        reason: e.to_string(),
                    });
                }
                let _ = reply.send(result);
            }
            Command::SetNotify {
                target,
                enable,
                reply,
            } => {
                let result = self.set_notify(&target, enable).await;
                if let Err(e) = &result {
                    self.bus.emit(EventKind::NotifyError {
                        characteristic: target,
                        reason: e.to_string(),
                    });
                }
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Services { reply } => {
                let _ = reply.send(self.registry.services().to_vec());
            }
        }
    }

    async fn connect(&mut self, device: DeviceInfo) -> Result<(), CommandError> {
        info!("Connect requested for {}", device.label());
        if self.state == SessionState::Connected {
            // One connection at a time: the old link is fully torn down
            // before the new connect goes out.
            self.teardown(true).await;
        }
        self.state = SessionState::Connecting;
        self.device = Some(device.clone());

        let (mut link, link_events) = match self.transport.connect(&device).await {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail_connect(device, e)),
        };

        // A device whose GATT tree cannot be walked is not usable, so a
        // discovery failure is a connect failure.
        let services = match link.discover_services().await {
            Ok(services) => services,
            Err(e) => {
                if let Err(te) = link.disconnect().await {
                    debug!("Teardown after failed discovery also failed: {te}");
                }
                return Err(self.fail_connect(device, e));
            }
        };

        info!(
            "Connected to {} ({} services, {} characteristics)",
            device.label(),
            services.len(),
            services.iter().map(|s| s.characteristics.len()).sum::<usize>()
        );
        self.registry.load(services);
        self.router.clear();
        self.link = Some(link);
        self.link_events = Some(link_events);
        self.state = SessionState::Connected;
        self.bus.emit(EventKind::Connected { device });
        Ok(())
    }

    fn fail_connect(&mut self, device: DeviceInfo, error: TransportError) -> CommandError {
        warn!("Connect to {} failed: {error}", device.label());
        self.device = None;
        self.state = SessionState::Idle;
        self.bus.emit(EventKind::ConnectFailed {
            device,
            reason: error.to_string(),
        });
        error.into()
    }

    async fn disconnect(&mut self) -> Result<(), CommandError> {
        if self.state == SessionState::Connected {
            self.teardown(true).await;
        } else {
            debug!("Disconnect requested while idle, nothing to do");
        }
        Ok(())
    }

    /// Tears down the current link. Best-effort at the adapter; local
    /// state always ends at `Idle`.
    async fn teardown(&mut self, announce: bool) {
        self.state = SessionState::Disconnecting;
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.disconnect().await {
                warn!("Adapter disconnect failed, dropping the link anyway: {e}");
            }
        }
        self.link_events = None;
        self.router.clear();
        self.registry.clear();
        let device = self.device.take();
        self.state = SessionState::Idle;
        if announce && let Some(device) = device {
            info!("Disconnected from {}", device.label());
            self.bus.emit(EventKind::Disconnected { device });
        }
    }

    async fn handle_link_lost(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        if let Some(device) = &self.device {
            warn!("Link to {} lost", device.label());
        }
        self.teardown(true).await;
    }

    async fn read(&mut self, target: &CharacteristicId) -> Result<Vec<u8>, CommandError> {
        if self.state != SessionState::Connected {
            return Err(CommandError::NotConnected);
        }
        let info = self.registry.lookup(target).ok_or(CommandError::InvalidTarget)?;
        if !info.properties.supports_read() {
            return Err(CommandError::Capability("read"));
        }
        let link = self.link.as_mut().ok_or(CommandError::NotConnected)?;
        let value = link.read(target).await?;
        debug!("Read {target}: {} bytes", value.len());
        self.bus.emit(EventKind::ReadResult {
            characteristic: *target,
            value: value.clone(),
        });
        Ok(value)
    }

    async fn write(
        &mut self,
        target: &CharacteristicId,
        payload: &str,
        encoding: PayloadEncoding,
    ) -> Result<Vec<u8>, CommandError> {
        if self.state != SessionState::Connected {
            return Err(CommandError::NotConnected);
        }
        let info = self.registry.lookup(target).ok_or(CommandError::InvalidTarget)?;
        if !info.properties.supports_write() {
            return Err(CommandError::Capability("write"));
        }
        // Prefer the acknowledged mode when the characteristic offers both.
        let mode = if info.properties.write {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        };
        let bytes = encoding.decode(payload)?;
        let link = self.link.as_mut().ok_or(CommandError::NotConnected)?;
        link.write(target, &bytes, mode).await?;
        debug!("Wrote {} bytes to {target}", bytes.len());
        self.bus.emit(EventKind::WriteResult {
            characteristic: *target,
            value: bytes.clone(),
        });
        Ok(bytes)
    }

    async fn set_notify(
        &mut self,
        target: &CharacteristicId,
        enable: bool,
    ) -> Result<(), CommandError> {
        if self.state != SessionState::Connected {
            return Err(CommandError::NotConnected);
        }
        let info = self
            .registry
            .lookup(target)
            .ok_or(CommandError::InvalidTarget)?
            .clone();
        let link = self.link.as_mut().ok_or(CommandError::NotConnected)?;
        if enable {
            self.router.subscribe(link.as_mut(), &info, &self.bus).await
        } else {
            self.router.unsubscribe(link.as_mut(), target, &self.bus).await
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            device: self.device.clone(),
            service_count: self.registry.service_count(),
            characteristic_count: self.registry.characteristic_count(),
            subscriptions: self.router.subscribed(),
        }
    }
}
