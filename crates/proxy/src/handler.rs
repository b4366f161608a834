//! Proxied-validator-side engine.
//!
//! The engine owns the [`ProxySet`] behind a background actor task: every
//! read and write of proxy/assignment state goes through an ordered command
//! queue, so callbacks, administrative changes, and send-path lookups are
//! serialized without a lock. Outbound transmission happens on the caller's
//! side of the queue, after the needed peer handles have been snapshotted,
//! so network I/O never blocks state updates.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::assignment::{ProxySet, SendGroup};
use crate::config::{EngineConfig, NodeRole};
use crate::enode::Enode;
use crate::enode_table::ValidatorEnodeTable;
use crate::error::ProxyError;
use crate::messages::{
    encode_message, ForwardMessage, ValEnodesShareMessage, FORWARD_MSG, VAL_ENODES_SHARE_MSG,
};
use crate::net::{MessageSender, PeerHandle, SharedPeer};
use crate::types::ProxyInfo;

/// Capacity of the actor's command queue.
const COMMAND_BUFFER: usize = 64;

/// Commands consumed by the proxy handler task.
enum Command {
    AddProxy {
        internal: Enode,
        external: Enode,
        resp: oneshot::Sender<Result<(), ProxyError>>,
    },
    RemoveProxy {
        id: B256,
        resp: oneshot::Sender<Result<Vec<Address>, ProxyError>>,
    },
    PeerConnected {
        peer: SharedPeer,
        resp: oneshot::Sender<Result<(), ProxyError>>,
    },
    PeerDisconnected {
        node_id: B256,
        resp: oneshot::Sender<()>,
    },
    AssignValidators {
        addresses: Vec<Address>,
        resp: oneshot::Sender<()>,
    },
    ResolveGroups {
        addresses: Vec<Address>,
        resp: oneshot::Sender<(Vec<SendGroup>, Vec<Address>)>,
    },
    PeeredGroups {
        resp: oneshot::Sender<Vec<SendGroup>>,
    },
    Snapshot {
        resp: oneshot::Sender<(Vec<ProxyInfo>, HashMap<B256, Vec<Address>>)>,
    },
    ValidatorAssignments {
        resp: oneshot::Sender<HashMap<Address, Option<Enode>>>,
    },
}

/// Background task owning the proxy set. Runs until the command channel
/// closes.
struct ProxyHandler {
    commands: mpsc::Receiver<Command>,
    proxies: ProxySet,
}

impl ProxyHandler {
    async fn run(mut self) {
        tracing::info!("Proxy handler started");

        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }

        tracing::info!("Proxy handler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::AddProxy {
                internal,
                external,
                resp,
            } => {
                let _ = resp.send(self.proxies.add_proxy(internal, external));
            }
            Command::RemoveProxy { id, resp } => {
                let _ = resp.send(self.proxies.remove_proxy(id));
            }
            Command::PeerConnected { peer, resp } => {
                let _ = resp.send(self.proxies.attach_peer(peer));
            }
            Command::PeerDisconnected { node_id, resp } => {
                self.proxies.detach_peer(node_id);
                let _ = resp.send(());
            }
            Command::AssignValidators { addresses, resp } => {
                self.proxies.assign_validators(addresses);
                let _ = resp.send(());
            }
            Command::ResolveGroups { addresses, resp } => {
                let _ = resp.send(self.proxies.resolve_send_groups(&addresses));
            }
            Command::PeeredGroups { resp } => {
                let _ = resp.send(self.proxies.peered_groups());
            }
            Command::Snapshot { resp } => {
                let _ = resp.send(self.proxies.snapshot());
            }
            Command::ValidatorAssignments { resp } => {
                let _ = resp.send(self.proxies.validator_assignments());
            }
        }
    }
}

struct Running {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// The engine running on the shielded validator node.
pub struct ProxiedValidatorEngine<S> {
    sender: Arc<S>,
    enode_table: Arc<ValidatorEnodeTable>,
    running: Mutex<Option<Running>>,
}

impl<S: MessageSender> ProxiedValidatorEngine<S> {
    /// Creates the engine. Fails with `NotProxiedValidator` unless the node
    /// is configured as a proxied validator.
    pub fn new(
        config: &EngineConfig,
        sender: Arc<S>,
        enode_table: Arc<ValidatorEnodeTable>,
    ) -> Result<Self, ProxyError> {
        if config.role != NodeRole::ProxiedValidator {
            return Err(ProxyError::NotProxiedValidator);
        }
        Ok(Self {
            sender,
            enode_table,
            running: Mutex::new(None),
        })
    }

    /// Starts the proxy handler task. Must be called from within a tokio
    /// runtime.
    pub fn start(&self) -> Result<(), ProxyError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ProxyError::AlreadyStarted);
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let handler = ProxyHandler {
            commands: commands_rx,
            proxies: ProxySet::new(),
        };
        let task = tokio::spawn(handler.run());

        *running = Some(Running {
            commands: commands_tx,
            task,
        });
        Ok(())
    }

    /// Stops the proxy handler task, waiting for it to finish so no command
    /// is processed after this returns. In-flight administrative calls fail
    /// with `NotRunning` once the channel closes.
    pub async fn stop(&self) -> Result<(), ProxyError> {
        let running = self.running.lock().take().ok_or(ProxyError::NotRunning)?;
        drop(running.commands);
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "Proxy handler task ended abnormally");
        }
        Ok(())
    }

    /// True while the handler task is running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    fn commands(&self) -> Result<mpsc::Sender<Command>, ProxyError> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.commands.clone())
            .ok_or(ProxyError::NotRunning)
    }

    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, ProxyError> {
        self.commands()?
            .send(command)
            .await
            .map_err(|_| ProxyError::NotRunning)?;
        rx.await.map_err(|_| ProxyError::ChannelClosed)
    }

    /// Adds a proxy by its internal and external enodes.
    pub async fn add_proxy(&self, internal: Enode, external: Enode) -> Result<(), ProxyError> {
        let (resp, rx) = oneshot::channel();
        self.request(
            Command::AddProxy {
                internal,
                external,
                resp,
            },
            rx,
        )
        .await?
    }

    /// Removes a proxy; every validator it served is reassigned.
    pub async fn remove_proxy(&self, id: B256) -> Result<Vec<Address>, ProxyError> {
        let (resp, rx) = oneshot::channel();
        self.request(Command::RemoveProxy { id, resp }, rx).await?
    }

    /// Callback for a proxy peer connecting. Fails with `UnauthorizedPeer`
    /// if the peer is not a configured proxy.
    pub async fn register_proxy_peer(&self, peer: SharedPeer) -> Result<(), ProxyError> {
        let (resp, rx) = oneshot::channel();
        self.request(Command::PeerConnected { peer, resp }, rx).await?
    }

    /// Callback for a proxy peer disconnecting. Idempotent.
    pub async fn unregister_proxy_peer(&self, peer: &dyn PeerHandle) -> Result<(), ProxyError> {
        let (resp, rx) = oneshot::channel();
        self.request(
            Command::PeerDisconnected {
                node_id: peer.node_id(),
                resp,
            },
            rx,
        )
        .await
    }

    /// Replaces the remote validator set and recomputes proxy assignments.
    pub async fn assign_validators(&self, addresses: Vec<Address>) -> Result<(), ProxyError> {
        let (resp, rx) = oneshot::channel();
        self.request(Command::AssignValidators { addresses, resp }, rx)
            .await
    }

    /// Point-in-time view of all proxies and the per-proxy assignments.
    pub async fn proxies_and_assignments(
        &self,
    ) -> Result<(Vec<ProxyInfo>, HashMap<B256, Vec<Address>>), ProxyError> {
        let (resp, rx) = oneshot::channel();
        self.request(Command::Snapshot { resp }, rx).await
    }

    /// The assignment of each tracked validator to its proxy's enode.
    pub async fn validator_assignments(
        &self,
    ) -> Result<HashMap<Address, Option<Enode>>, ProxyError> {
        let (resp, rx) = oneshot::channel();
        self.request(Command::ValidatorAssignments { resp }, rx).await
    }

    /// Send path of the forward protocol.
    ///
    /// With `explicit_peers` the envelopes go to exactly those connections
    /// (used for broadcast-to-all-proxies cases); otherwise destinations are
    /// grouped by their assigned, connected proxy. Destinations without a
    /// reachable proxy are dropped with a warning, and an empty resulting
    /// proxy set is success with zero transmissions. A per-proxy payload
    /// override replaces the shared payload for that proxy's node id. One
    /// proxy's transmission failure does not stop the others; the first
    /// error is returned.
    pub async fn send_forward(
        &self,
        explicit_peers: Option<Vec<SharedPeer>>,
        dest_addresses: &[Address],
        inner_code: u64,
        payload: Bytes,
        per_proxy_payload: &HashMap<B256, Bytes>,
    ) -> Result<(), ProxyError> {
        let groups: Vec<SendGroup> = match explicit_peers {
            Some(peers) => peers
                .into_iter()
                .map(|peer| SendGroup {
                    peer,
                    // Explicit-peer sends carry no destination subset.
                    addresses: Vec::new(),
                })
                .collect(),
            None => {
                let (resp, rx) = oneshot::channel();
                let (groups, unreachable) = self
                    .request(
                        Command::ResolveGroups {
                            addresses: dest_addresses.to_vec(),
                            resp,
                        },
                        rx,
                    )
                    .await?;
                if !unreachable.is_empty() {
                    tracing::warn!(
                        code = inner_code,
                        dropped = unreachable.len(),
                        "Dropping destinations with no reachable proxy"
                    );
                }
                groups
            }
        };

        if groups.is_empty() {
            tracing::warn!(
                code = inner_code,
                "No proxy available for any destination of a forward message"
            );
            return Ok(());
        }

        // Transmission happens here, outside the handler task, using the
        // snapshotted peer handles.
        let mut first_error = None;
        for group in groups {
            let body = per_proxy_payload
                .get(&group.peer.node_id())
                .cloned()
                .unwrap_or_else(|| payload.clone());
            let envelope = ForwardMessage {
                code: inner_code,
                dest_addresses: group.addresses,
                msg: body,
            };
            tracing::debug!(
                proxy = %group.peer.node_id(),
                code = inner_code,
                destinations = envelope.dest_addresses.len(),
                "Sending forward message"
            );
            if let Err(e) =
                self.sender
                    .unicast(group.peer.as_ref(), encode_message(&envelope), FORWARD_MSG)
            {
                tracing::error!(proxy = %group.peer.node_id(), error = %e, "Failed to send forward message");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Sends every connected proxy the enode records of the validators
    /// assigned to it.
    pub async fn send_val_enodes_share_to_all_proxies(&self) -> Result<(), ProxyError> {
        let (resp, rx) = oneshot::channel();
        let groups = self.request(Command::PeeredGroups { resp }, rx).await?;

        let mut first_error = None;
        for group in groups {
            let batch = ValEnodesShareMessage {
                val_enodes: self.enode_table.entries_for(&group.addresses),
            };
            tracing::debug!(
                proxy = %group.peer.node_id(),
                records = batch.val_enodes.len(),
                "Sending validator enode share message"
            );
            if let Err(e) = self.sender.unicast(
                group.peer.as_ref(),
                encode_message(&batch),
                VAL_ENODES_SHARE_MSG,
            ) {
                tracing::error!(proxy = %group.peer.node_id(), error = %e, "Failed to send enode share message");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
