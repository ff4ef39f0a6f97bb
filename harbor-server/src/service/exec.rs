//! Instance exec sessions
//!
//! An exec session relays an interactive command between a client and the
//! entrypoint running inside a deployed instance. The client opens the
//! session; exactly one entrypoint may attach to it. The session is removed
//! from the registry as soon as either side goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{Result, Service, ServiceError};

const EXEC_CHANNEL_SIZE: usize = 64;

/// Frames relayed through an exec session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecEvent {
    /// Server → client, the session ID an entrypoint attaches with
    Opened { exec_id: u64 },
    /// Client → entrypoint stdin
    Input { data: Vec<u8> },
    /// Entrypoint → client stdout/stderr
    Output { data: Vec<u8> },
    /// Client → entrypoint terminal resize
    WindowSize { rows: u16, cols: u16 },
    /// Entrypoint → client, the command finished
    Exit { code: i32 },
}

type EntrypointHalves = (mpsc::Sender<ExecEvent>, mpsc::Receiver<ExecEvent>);

struct InstanceExec {
    instance_id: String,
    args: Vec<String>,
    connected: AtomicBool,
    /// Taken by the single entrypoint that wins `connected`
    entrypoint: Mutex<Option<EntrypointHalves>>,
}

type Sessions = Arc<Mutex<HashMap<u64, Arc<InstanceExec>>>>;

#[derive(Clone, Default)]
pub struct ExecRegistry {
    sessions: Sessions,
    next_id: Arc<AtomicU64>,
}

impl ExecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<InstanceExec>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Opens a session for `instance_id` and returns the client side
    pub fn start(&self, instance_id: impl Into<String>, args: Vec<String>) -> ClientExec {
        let exec_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (client_tx, client_rx) = mpsc::channel(EXEC_CHANNEL_SIZE);
        let (entrypoint_tx, entrypoint_rx) = mpsc::channel(EXEC_CHANNEL_SIZE);

        let session = Arc::new(InstanceExec {
            instance_id: instance_id.into(),
            args,
            connected: AtomicBool::new(false),
            entrypoint: Mutex::new(Some((client_tx, entrypoint_rx))),
        });
        self.lock().insert(exec_id, session);

        ClientExec {
            exec_id,
            tx: entrypoint_tx,
            rx: client_rx,
            _guard: SessionGuard {
                sessions: self.sessions.clone(),
                exec_id,
            },
        }
    }

    /// Attaches the entrypoint side. Fails for unknown sessions and for
    /// every attempt after the first.
    pub fn connect(&self, exec_id: u64) -> Result<EntrypointExec> {
        let session = self
            .lock()
            .get(&exec_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("exec session {exec_id} not found")))?;

        if session
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServiceError::AlreadyExists(format!(
                "exec session {exec_id} already has an entrypoint"
            )));
        }

        let (tx, rx) = session
            .entrypoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| {
                tracing::error!(exec_id, "Exec entrypoint channels missing, should not happen");
                ServiceError::Internal(format!("exec session {exec_id} has no entrypoint channels"))
            })?;

        Ok(EntrypointExec {
            exec_id,
            instance_id: session.instance_id.clone(),
            args: session.args.clone(),
            tx,
            rx,
            _guard: SessionGuard {
                sessions: self.sessions.clone(),
                exec_id,
            },
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the session when either side is dropped
struct SessionGuard {
    sessions: Sessions,
    exec_id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.remove(&self.exec_id).is_some() {
            tracing::debug!(exec_id = self.exec_id, "Exec session closed");
        }
    }
}

pub struct ClientExec {
    exec_id: u64,
    tx: mpsc::Sender<ExecEvent>,
    rx: mpsc::Receiver<ExecEvent>,
    _guard: SessionGuard,
}

impl ClientExec {
    pub fn id(&self) -> u64 {
        self.exec_id
    }

    /// Sends to the entrypoint. Fails once the entrypoint is gone.
    pub async fn send(&self, event: ExecEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ServiceError::Aborted("exec entrypoint disconnected".to_string()))
    }

    /// Next event from the entrypoint; `None` once it is gone
    pub async fn recv(&mut self) -> Option<ExecEvent> {
        self.rx.recv().await
    }

    /// Relays between a client connection and the entrypoint, starting with
    /// an `Opened` frame. Ends when either side goes away or the command
    /// exits.
    pub async fn relay(
        mut self,
        mut rx: mpsc::UnboundedReceiver<ExecEvent>,
        tx: mpsc::Sender<ExecEvent>,
    ) -> Result<()> {
        send_to(&tx, ExecEvent::Opened { exec_id: self.exec_id }).await?;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.send(event).await?,
                    None => return Ok(()),
                },
                event = self.rx.recv() => match event {
                    Some(event) => {
                        let exited = matches!(event, ExecEvent::Exit { .. });
                        send_to(&tx, event).await?;
                        if exited {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

pub struct EntrypointExec {
    exec_id: u64,
    instance_id: String,
    args: Vec<String>,
    tx: mpsc::Sender<ExecEvent>,
    rx: mpsc::Receiver<ExecEvent>,
    _guard: SessionGuard,
}

impl EntrypointExec {
    pub fn id(&self) -> u64 {
        self.exec_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub async fn send(&self, event: ExecEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ServiceError::Aborted("exec client disconnected".to_string()))
    }

    pub async fn recv(&mut self) -> Option<ExecEvent> {
        self.rx.recv().await
    }

    /// Relays between the entrypoint connection and the client
    pub async fn relay(
        mut self,
        mut rx: mpsc::UnboundedReceiver<ExecEvent>,
        tx: mpsc::Sender<ExecEvent>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        let exited = matches!(event, ExecEvent::Exit { .. });
                        self.send(event).await?;
                        if exited {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                event = self.rx.recv() => match event {
                    Some(event) => send_to(&tx, event).await?,
                    None => return Ok(()),
                },
            }
        }
    }
}

async fn send_to(tx: &mpsc::Sender<ExecEvent>, event: ExecEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| ServiceError::Aborted("exec connection closed".to_string()))
}

impl Service {
    pub fn start_exec(&self, instance_id: &str, args: Vec<String>) -> Result<ClientExec> {
        if instance_id.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "instance ID must not be empty".to_string(),
            ));
        }
        let exec = self.execs.start(instance_id, args);
        tracing::info!(exec_id = exec.id(), instance_id, "Exec session started");
        Ok(exec)
    }

    pub fn connect_exec(&self, exec_id: u64) -> Result<EntrypointExec> {
        let exec = self.execs.connect(exec_id)?;
        tracing::info!(exec_id, instance_id = exec.instance_id(), "Exec entrypoint connected");
        Ok(exec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_relay_both_ways() {
        let registry = ExecRegistry::new();
        let mut client = registry.start("inst-1", vec!["sh".to_string()]);
        let mut entrypoint = registry.connect(client.id()).unwrap();
        assert_eq!(entrypoint.instance_id(), "inst-1");
        assert_eq!(entrypoint.args(), ["sh".to_string()]);

        client
            .send(ExecEvent::Input {
                data: b"ls\n".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(
            entrypoint.recv().await,
            Some(ExecEvent::Input {
                data: b"ls\n".to_vec()
            })
        );

        entrypoint.send(ExecEvent::Exit { code: 0 }).await.unwrap();
        assert_eq!(client.recv().await, Some(ExecEvent::Exit { code: 0 }));
    }

    #[tokio::test]
    async fn test_only_one_entrypoint_attaches() {
        let registry = ExecRegistry::new();
        let client = registry.start("inst-1", Vec::new());

        let _first = registry.connect(client.id()).unwrap();
        assert!(matches!(
            registry.connect(client.id()),
            Err(ServiceError::AlreadyExists(_))
        ));
        assert!(matches!(
            registry.connect(client.id() + 100),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_removed_when_either_side_drops() {
        let registry = ExecRegistry::new();

        let client = registry.start("inst-1", Vec::new());
        let mut entrypoint = registry.connect(client.id()).unwrap();
        assert_eq!(registry.len(), 1);
        drop(client);
        assert!(registry.is_empty());
        assert_eq!(entrypoint.recv().await, None);

        let mut client = registry.start("inst-2", Vec::new());
        let entrypoint = registry.connect(client.id()).unwrap();
        drop(entrypoint);
        assert!(registry.is_empty());
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_relay_forwards_until_exit() {
        let registry = ExecRegistry::new();
        let client = registry.start("inst-1", Vec::new());
        let exec_id = client.id();
        let entrypoint = registry.connect(exec_id).unwrap();

        let (client_in, client_rx) = mpsc::unbounded_channel();
        let (client_tx, mut client_out) = mpsc::channel(8);
        let client_relay = tokio::spawn(client.relay(client_rx, client_tx));

        let (entry_in, entry_rx) = mpsc::unbounded_channel();
        let (entry_tx, mut entry_out) = mpsc::channel(8);
        let entry_relay = tokio::spawn(entrypoint.relay(entry_rx, entry_tx));

        assert_eq!(client_out.recv().await, Some(ExecEvent::Opened { exec_id }));

        client_in
            .send(ExecEvent::WindowSize { rows: 24, cols: 80 })
            .unwrap();
        assert_eq!(
            entry_out.recv().await,
            Some(ExecEvent::WindowSize { rows: 24, cols: 80 })
        );

        entry_in.send(ExecEvent::Exit { code: 3 }).unwrap();
        assert_eq!(client_out.recv().await, Some(ExecEvent::Exit { code: 3 }));

        entry_relay.await.unwrap().unwrap();
        client_relay.await.unwrap().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_exec_requires_instance() {
        let service = Service::in_memory(crate::config::ServerConfig::default());
        assert!(matches!(
            service.start_exec("", Vec::new()),
            Err(ServiceError::InvalidArgument(_))
        ));
        let client = service.start_exec("inst-1", Vec::new()).unwrap();
        assert!(service.connect_exec(client.id()).is_ok());
    }
}
