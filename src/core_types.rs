use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::timer::ElectionTimer;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A log entry. The command is opaque bytes; nothing in this crate
/// interprets or applies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: u64,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
}

/// Point-in-time view of a node, served to the `Status` RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: u64,
    pub term: u64,
    pub role: Role,
    pub voted_for: Option<u64>,
    pub leader_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcMessage {
    RequestVote(RequestVoteArgs),
    RequestVoteReply(RequestVoteReply),
    AppendEntries(AppendEntriesArgs),
    AppendEntriesReply(AppendEntriesReply),
    Status,
    StatusReply(NodeStatus),
}

impl RpcMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RpcMessage::RequestVote(_) => "RequestVote",
            RpcMessage::RequestVoteReply(_) => "RequestVoteReply",
            RpcMessage::AppendEntries(_) => "AppendEntries",
            RpcMessage::AppendEntriesReply(_) => "AppendEntriesReply",
            RpcMessage::Status => "Status",
            RpcMessage::StatusReply(_) => "StatusReply",
        }
    }
}

/// The per-node consensus record. Every field is read and written only
/// while holding the node's single lock.
#[derive(Debug)]
pub struct Server {
    pub id: u64,
    pub role: Role,
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub leader_id: Option<u64>,
    pub log: Vec<LogEntry>,
    /// Membership size including this node.
    pub cluster_size: usize,
    /// Grants collected for the election started in `current_term`.
    pub votes_received: HashSet<u64>,
    pub election_timer: ElectionTimer,
}

impl Server {
    pub fn new(id: u64, cluster_size: usize, election_timer: ElectionTimer) -> Self {
        Server {
            id,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Vec::new(),
            cluster_size,
            votes_received: HashSet::new(),
            election_timer,
        }
    }

    pub fn has_majority(&self) -> bool {
        self.votes_received.len() > self.cluster_size / 2
    }

    /// Adopts a strictly newer term and steps down.
    pub fn become_follower(&mut self, term: u64) {
        debug_assert!(term > self.current_term);
        info!(
            "S{} T{} BECAME_FOLLOWER: Adopting T{} (was {:?}).",
            self.id, self.current_term, term, self.role
        );
        self.role = Role::Follower;
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = None;
        self.votes_received.clear();
    }

    /// Returns true only on the actual transition, so repeated majority
    /// confirmations in the same term are no-ops.
    pub fn become_leader(&mut self) -> bool {
        if self.role == Role::Leader {
            return false;
        }
        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        info!(
            "S{} T{} BECAME_LEADER: Won election with {}/{} votes.",
            self.id,
            self.current_term,
            self.votes_received.len(),
            self.cluster_size
        );
        true
    }

    /// Candidate entry: bump the term, vote for self, re-arm the timer.
    /// Returns the term this election runs under.
    pub fn begin_election(&mut self) -> u64 {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes_received.clear();
        self.votes_received.insert(self.id);
        self.election_timer.arm();
        info!(
            "S{} T{} ELECTION_START: Candidate requesting votes from {} peers.",
            self.id,
            self.current_term,
            self.cluster_size.saturating_sub(1)
        );
        self.current_term
    }

    /// Integrates one vote reply for the election started in `election_term`.
    /// Returns true if this reply made the node leader.
    pub fn handle_request_vote_reply(
        &mut self,
        from_peer_id: u64,
        election_term: u64,
        reply: RequestVoteReply,
    ) -> bool {
        if reply.term > self.current_term {
            self.become_follower(reply.term);
            return false;
        }
        if self.role != Role::Candidate || self.current_term != election_term {
            debug!(
                "S{} T{} RV_REPLY_STALE from P{} for T{}: ignoring.",
                self.id, self.current_term, from_peer_id, election_term
            );
            return false;
        }
        if !reply.vote_granted {
            debug!("S{} T{} RV_REPLY_DENIED by P{}.", self.id, self.current_term, from_peer_id);
            return false;
        }

        self.votes_received.insert(from_peer_id);
        debug!(
            "S{} T{} RV_REPLY_VOTE_TALLY by P{}: {}/{}.",
            self.id,
            self.current_term,
            from_peer_id,
            self.votes_received.len(),
            self.cluster_size
        );
        self.has_majority() && self.become_leader()
    }

    /// Only a higher term in a heartbeat reply matters; nothing else is tracked.
    pub fn handle_append_entries_reply(&mut self, from_peer_id: u64, reply: AppendEntriesReply) {
        if reply.term > self.current_term {
            debug!(
                "S{} T{} AE_REPLY_NEWER_TERM from P{}(T{}).",
                self.id, self.current_term, from_peer_id, reply.term
            );
            self.become_follower(reply.term);
        }
    }

    /// Heartbeat to fan out, or `None` once this node is no longer leader.
    pub fn heartbeat_payload(&self) -> Option<AppendEntriesArgs> {
        if self.role != Role::Leader {
            return None;
        }
        Some(AppendEntriesArgs {
            term: self.current_term,
            leader_id: self.id,
            entries: self.log.clone(),
        })
    }

    pub fn handle_request_vote(&mut self, args: RequestVoteArgs) -> RequestVoteReply {
        if args.term < self.current_term {
            debug!(
                "S{} T{} RV_REJECT_OLD_TERM from C{}(T{}).",
                self.id, self.current_term, args.candidate_id, args.term
            );
            return RequestVoteReply { term: self.current_term, vote_granted: false };
        }
        if args.term > self.current_term {
            self.become_follower(args.term);
        }

        let vote_granted = match self.voted_for {
            None => true,
            Some(candidate) => candidate == args.candidate_id,
        };
        if vote_granted {
            self.voted_for = Some(args.candidate_id);
            self.election_timer.arm();
            info!(
                "S{} T{} VOTE_GRANTED: To C{}.",
                self.id, self.current_term, args.candidate_id
            );
        } else {
            debug!(
                "S{} T{} RV_REJECT_ALREADY_VOTED for C{}: vote held by {:?}.",
                self.id, self.current_term, args.candidate_id, self.voted_for
            );
        }
        RequestVoteReply { term: self.current_term, vote_granted }
    }

    pub fn handle_append_entries(&mut self, args: AppendEntriesArgs) -> AppendEntriesReply {
        if args.term < self.current_term {
            debug!(
                "S{} T{} AE_REJECT_OLD_TERM from L{}(T{}).",
                self.id, self.current_term, args.leader_id, args.term
            );
            return AppendEntriesReply { term: self.current_term, success: false };
        }
        if args.term > self.current_term {
            self.become_follower(args.term);
        } else if self.role != Role::Follower {
            info!(
                "S{} T{} BECAME_FOLLOWER: Stepping down as {:?} for L{}.",
                self.id, self.current_term, self.role, args.leader_id
            );
            self.role = Role::Follower;
        }
        self.leader_id = Some(args.leader_id);
        self.election_timer.arm();
        debug!(
            "S{} T{} AE_ACCEPT from L{}: {} entries.",
            self.id,
            self.current_term,
            args.leader_id,
            args.entries.len()
        );
        AppendEntriesReply { term: self.current_term, success: true }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            term: self.current_term,
            role: self.role,
            voted_for: self.voted_for,
            leader_id: self.leader_id,
        }
    }
}
