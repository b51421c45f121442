use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{RaftError, Result};

pub const MIN_ELECTION_TIMEOUT_MS: u64 = 300;
pub const MAX_ELECTION_TIMEOUT_MS: u64 = 600;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 500;

/// Static description of one cluster member. `peers` holds every member,
/// this node included, and is fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: u64,
    pub peers: BTreeMap<u64, String>,
    pub election_timeout_min_ms: u64,
    /// Exclusive upper bound.
    pub election_timeout_max_ms: u64,
    pub rpc_timeout_ms: u64,
}

impl NodeConfig {
    pub fn new(id: u64, peers: BTreeMap<u64, String>) -> Self {
        Self {
            id,
            peers,
            election_timeout_min_ms: MIN_ELECTION_TIMEOUT_MS,
            election_timeout_max_ms: MAX_ELECTION_TIMEOUT_MS,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.peers.contains_key(&self.id) {
            return Err(RaftError::UnknownNode(self.id));
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(RaftError::InvalidTimeoutRange {
                min: self.election_timeout_min_ms,
                max: self.election_timeout_max_ms,
            });
        }
        if self.rpc_timeout_ms == 0 {
            return Err(RaftError::ZeroRpcTimeout);
        }
        Ok(())
    }

    /// Address this node listens on.
    pub fn listen_addr(&self) -> Result<&str> {
        self.peers
            .get(&self.id)
            .map(String::as_str)
            .ok_or(RaftError::UnknownNode(self.id))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// The three-node localhost table used when no `--peers` are given.
pub fn default_peers() -> BTreeMap<u64, String> {
    BTreeMap::from([
        (1, "127.0.0.1:8001".to_string()),
        (2, "127.0.0.1:8002".to_string()),
        (3, "127.0.0.1:8003".to_string()),
    ])
}

/// Builds the peer table from parsed entries. Ids must be unique; a
/// repeated id would silently shrink the membership and the majority.
pub fn peer_table<I>(entries: I) -> Result<BTreeMap<u64, String>>
where
    I: IntoIterator<Item = (u64, String)>,
{
    let mut peers = BTreeMap::new();
    for (id, addr) in entries {
        if let Some(previous) = peers.insert(id, addr.clone()) {
            return Err(RaftError::InvalidPeer(format!(
                "{}={} (id {} already maps to {})",
                id, addr, id, previous
            )));
        }
    }
    Ok(peers)
}

/// Parses a single `<id>=<host:port>` peer table entry.
pub fn parse_peer(entry: &str) -> Result<(u64, String)> {
    let invalid = || RaftError::InvalidPeer(entry.to_string());
    let (id, addr) = entry.split_once('=').ok_or_else(invalid)?;
    let id = id.trim().parse::<u64>().map_err(|_| invalid())?;
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(invalid());
    }
    Ok((id, addr.to_string()))
}
