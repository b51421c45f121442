use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::core_types::{NodeStatus, RequestVoteArgs, Role, RpcMessage, Server};
use crate::error::Result;
use crate::timer::ElectionTimer;
use crate::transport::{RpcHandler, Transport};

/// One cluster member: the locked consensus record plus the handles every
/// spawned task needs. Cloning is cheap and shares the same record.
#[derive(Clone)]
pub struct RaftNode {
    id: u64,
    peers: Arc<BTreeMap<u64, String>>,
    server: Arc<Mutex<Server>>,
    transport: Arc<dyn Transport>,
}

impl RaftNode {
    pub fn new(config: &NodeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let timer = ElectionTimer::new(config.election_timeout_min_ms, config.election_timeout_max_ms);
        let server = Server::new(config.id, config.peers.len(), timer);
        Ok(RaftNode {
            id: config.id,
            peers: Arc::new(config.peers.clone()),
            server: Arc::new(Mutex::new(server)),
            transport,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn status(&self) -> NodeStatus {
        self.server.lock().await.status()
    }

    /// Arms the election timer and spawns the control loop.
    pub async fn start(&self) -> JoinHandle<()> {
        self.server.lock().await.election_timer.arm();
        info!("S{} START: Follower with {} cluster members.", self.id, self.peers.len());
        let node = self.clone();
        tokio::spawn(async move { node.run_election_loop().await })
    }

    async fn run_election_loop(self) {
        loop {
            let (due, rearmed) = {
                let server = self.server.lock().await;
                (server.election_timer.due(), server.election_timer.rearmed())
            };
            tokio::select! {
                _ = tokio::time::sleep_until(due) => {}
                _ = rearmed.notified() => continue,
            }

            let role = {
                let server = self.server.lock().await;
                if !server.election_timer.expired() {
                    continue;
                }
                server.role
            };

            match role {
                Role::Follower | Role::Candidate => self.start_election().await,
                Role::Leader => {
                    self.send_heartbeats().await;
                    self.server.lock().await.election_timer.arm();
                }
            }
        }
    }

    fn other_peers(&self) -> impl Iterator<Item = (u64, String)> + '_ {
        self.peers
            .iter()
            .filter(move |(peer_id, _)| **peer_id != self.id)
            .map(|(peer_id, addr)| (*peer_id, addr.clone()))
    }

    /// Becomes candidate for the next term and canvasses every peer
    /// concurrently. Replies are folded in as they land; the node never
    /// waits for the round to finish.
    pub async fn start_election(&self) {
        let (term, won_alone) = {
            let mut server = self.server.lock().await;
            let term = server.begin_election();
            (term, server.has_majority() && server.become_leader())
        };
        if won_alone {
            self.send_heartbeats().await;
            return;
        }

        for (peer_id, address) in self.other_peers() {
            let node = self.clone();
            tokio::spawn(async move {
                let args = RequestVoteArgs { term, candidate_id: node.id };
                let reply = match node.transport.call(&address, RpcMessage::RequestVote(args)).await {
                    Ok(RpcMessage::RequestVoteReply(reply)) => reply,
                    Ok(other) => {
                        warn!("S{} T{} RV_BAD_REPLY from P{}: {}", node.id, term, peer_id, other.kind());
                        return;
                    }
                    Err(e) => {
                        debug!("S{} T{} RV_SEND_FAILED -> P{}: {}", node.id, term, peer_id, e);
                        return;
                    }
                };

                let became_leader = node
                    .server
                    .lock()
                    .await
                    .handle_request_vote_reply(peer_id, term, reply);
                if became_leader {
                    node.send_heartbeats().await;
                }
            });
        }
    }

    /// Fans one heartbeat round out to every peer, if still leader.
    pub async fn send_heartbeats(&self) {
        let Some(args) = self.server.lock().await.heartbeat_payload() else {
            return;
        };
        debug!("S{} T{} LEADER_HEARTBEAT: to {} peers.", self.id, args.term, self.peers.len() - 1);

        for (peer_id, address) in self.other_peers() {
            let node = self.clone();
            let heartbeat = args.clone();
            tokio::spawn(async move {
                let term = heartbeat.term;
                match node.transport.call(&address, RpcMessage::AppendEntries(heartbeat)).await {
                    Ok(RpcMessage::AppendEntriesReply(reply)) => {
                        node.server
                            .lock()
                            .await
                            .handle_append_entries_reply(peer_id, reply);
                    }
                    Ok(other) => {
                        warn!("S{} T{} AE_BAD_REPLY from P{}: {}", node.id, term, peer_id, other.kind());
                    }
                    Err(e) => {
                        debug!("S{} T{} AE_SEND_FAILED -> P{}: {}", node.id, term, peer_id, e);
                    }
                }
            });
        }
    }
}

#[async_trait]
impl RpcHandler for RaftNode {
    async fn handle(&self, message: RpcMessage) -> Option<RpcMessage> {
        let mut server = self.server.lock().await;
        match message {
            RpcMessage::RequestVote(args) => {
                Some(RpcMessage::RequestVoteReply(server.handle_request_vote(args)))
            }
            RpcMessage::AppendEntries(args) => {
                Some(RpcMessage::AppendEntriesReply(server.handle_append_entries(args)))
            }
            RpcMessage::Status => Some(RpcMessage::StatusReply(server.status())),
            RpcMessage::RequestVoteReply(_)
            | RpcMessage::AppendEntriesReply(_)
            | RpcMessage::StatusReply(_) => None,
        }
    }
}
