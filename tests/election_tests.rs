use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{Instant, sleep};

use raft_election::core_types::{AppendEntriesArgs, RequestVoteArgs};
use raft_election::{
    NodeConfig, NodeStatus, RaftError, RaftNode, Result, Role, RpcHandler, RpcMessage, Transport,
};

/// In-process network: addresses map straight to nodes, and any node can
/// be cut off from everyone else.
#[derive(Default)]
struct LocalNet {
    nodes: RwLock<HashMap<String, RaftNode>>,
    isolated: RwLock<HashSet<String>>,
}

struct LocalTransport {
    from: String,
    net: Arc<LocalNet>,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, address: &str, message: RpcMessage) -> Result<RpcMessage> {
        let reachable = {
            let isolated = self.net.isolated.read().unwrap();
            !isolated.contains(&self.from) && !isolated.contains(address)
        };
        let node = self.net.nodes.read().unwrap().get(address).cloned();
        match node {
            Some(node) if reachable => node
                .handle(message)
                .await
                .ok_or_else(|| RaftError::UnexpectedReply(address.to_string())),
            _ => Err(RaftError::Io(std::io::ErrorKind::ConnectionRefused.into())),
        }
    }
}

struct Cluster {
    net: Arc<LocalNet>,
    nodes: Vec<RaftNode>,
}

fn addr(id: u64) -> String {
    format!("node-{}", id)
}

impl Cluster {
    fn new(size: u64, min_ms: u64, max_ms: u64) -> Self {
        let net = Arc::new(LocalNet::default());
        let peers: BTreeMap<u64, String> = (1..=size).map(|id| (id, addr(id))).collect();
        let mut nodes = Vec::new();
        for id in 1..=size {
            let mut config = NodeConfig::new(id, peers.clone());
            config.election_timeout_min_ms = min_ms;
            config.election_timeout_max_ms = max_ms;
            let transport = Arc::new(LocalTransport { from: addr(id), net: Arc::clone(&net) });
            let node = RaftNode::new(&config, transport).unwrap();
            net.nodes.write().unwrap().insert(addr(id), node.clone());
            nodes.push(node);
        }
        Cluster { net, nodes }
    }

    fn node(&self, id: u64) -> &RaftNode {
        &self.nodes[(id - 1) as usize]
    }

    async fn start_all(&self) {
        for node in &self.nodes {
            node.start().await;
        }
    }

    fn isolate(&self, id: u64) {
        self.net.isolated.write().unwrap().insert(addr(id));
    }

    fn isolate_all(&self) {
        for node in &self.nodes {
            self.isolate(node.id());
        }
    }

    fn heal(&self) {
        self.net.isolated.write().unwrap().clear();
    }

    async fn statuses(&self) -> Vec<NodeStatus> {
        let mut out = Vec::new();
        for node in &self.nodes {
            out.push(node.status().await);
        }
        out
    }
}

async fn wait_until<F>(node: &RaftNode, within: Duration, mut pred: F) -> NodeStatus
where
    F: FnMut(&NodeStatus) -> bool,
{
    let deadline = Instant::now() + within;
    loop {
        let status = node.status().await;
        if pred(&status) {
            return status;
        }
        if Instant::now() >= deadline {
            panic!("node {} stuck at {:?}", node.id(), status);
        }
        sleep(Duration::from_millis(2)).await;
    }
}

/// Samples the cluster for `duration`, asserting per-node term monotonicity
/// and at most one leader per term. Returns every (term, leader) observed.
async fn watch_safety(cluster: &Cluster, duration: Duration) -> HashMap<u64, u64> {
    let deadline = Instant::now() + duration;
    let mut last_terms: HashMap<u64, u64> = HashMap::new();
    let mut leaders: HashMap<u64, u64> = HashMap::new();
    while Instant::now() < deadline {
        for status in cluster.statuses().await {
            let last = last_terms.entry(status.id).or_insert(0);
            assert!(status.term >= *last, "term went backwards on node {}", status.id);
            *last = status.term;

            if status.role == Role::Leader {
                let leader = leaders.entry(status.term).or_insert(status.id);
                assert_eq!(*leader, status.id, "two leaders in term {}", status.term);
            }
        }
        sleep(Duration::from_millis(3)).await;
    }
    leaders
}

#[tokio::test]
async fn first_candidate_wins_with_all_votes() {
    let cluster = Cluster::new(3, 300, 600);

    cluster.node(1).start_election().await;

    let leader = wait_until(cluster.node(1), Duration::from_secs(1), |s| s.role == Role::Leader).await;
    assert_eq!(leader.term, 1);
    for id in [2, 3] {
        let follower = wait_until(cluster.node(id), Duration::from_secs(1), |s| {
            s.leader_id == Some(1) && s.voted_for == Some(1)
        })
        .await;
        assert_eq!(follower.role, Role::Follower);
        assert_eq!(follower.term, 1);
    }
}

async fn settle_leader(cluster: &Cluster, leader: u64) {
    wait_until(cluster.node(leader), Duration::from_secs(1), |s| s.role == Role::Leader).await;
    for node in &cluster.nodes {
        wait_until(node, Duration::from_secs(1), |s| s.leader_id == Some(leader)).await;
    }
}

#[tokio::test]
async fn rejected_heartbeat_demotes_stale_leader() {
    let cluster = Cluster::new(3, 300, 600);
    cluster.node(1).start_election().await;
    settle_leader(&cluster, 1).await;

    // Node 2 times out on its own while cut off and reaches term 2.
    cluster.isolate(2);
    cluster.node(2).start_election().await;
    // Let its vote requests fail before the link comes back.
    sleep(Duration::from_millis(20)).await;
    let candidate = cluster.node(2).status().await;
    assert_eq!((candidate.role, candidate.term), (Role::Candidate, 2));
    cluster.heal();

    cluster.node(1).send_heartbeats().await;

    let old_leader = wait_until(cluster.node(1), Duration::from_secs(1), |s| s.role == Role::Follower).await;
    assert_eq!(old_leader.term, 2);
    assert_eq!(old_leader.voted_for, None);
    assert_eq!(cluster.node(2).status().await.role, Role::Candidate);
}

#[tokio::test]
async fn direct_stale_heartbeat_is_refused() {
    let cluster = Cluster::new(3, 300, 600);
    cluster.isolate(2);
    cluster.node(2).start_election().await;
    cluster.node(2).start_election().await;

    let reply = cluster
        .node(2)
        .handle(RpcMessage::AppendEntries(AppendEntriesArgs {
            term: 1,
            leader_id: 1,
            entries: Vec::new(),
        }))
        .await;

    match reply {
        Some(RpcMessage::AppendEntriesReply(r)) => {
            assert!(!r.success);
            assert_eq!(r.term, 2);
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn cluster_elects_a_single_leader_per_term() {
    let cluster = Cluster::new(3, 40, 80);
    cluster.start_all().await;

    let leaders = watch_safety(&cluster, Duration::from_millis(800)).await;

    assert!(!leaders.is_empty(), "no leader emerged");
}

#[tokio::test]
async fn five_node_cluster_tolerates_two_failures() {
    let cluster = Cluster::new(5, 40, 80);
    cluster.isolate(4);
    cluster.isolate(5);
    cluster.start_all().await;

    let leaders = watch_safety(&cluster, Duration::from_millis(800)).await;

    assert!(!leaders.is_empty(), "majority of three should still elect");
    assert!(leaders.values().all(|id| *id <= 3));
}

#[tokio::test]
async fn split_cluster_keeps_retrying_with_higher_terms() {
    let cluster = Cluster::new(3, 40, 80);
    cluster.isolate_all();
    cluster.start_all().await;

    let leaders = watch_safety(&cluster, Duration::from_millis(400)).await;

    assert!(leaders.is_empty());
    for status in cluster.statuses().await {
        assert_eq!(status.role, Role::Candidate);
        assert!(status.term >= 2, "node {} only reached term {}", status.id, status.term);
    }

    cluster.heal();
    let leaders = watch_safety(&cluster, Duration::from_millis(800)).await;
    assert!(!leaders.is_empty(), "no leader after healing");
}

#[tokio::test]
async fn simultaneous_candidates_split_then_retry_next_term() {
    let cluster = Cluster::new(3, 300, 600);
    cluster.isolate(3);

    // Both self-vote in term 1 before either request lands, so each denies the other.
    tokio::join!(cluster.node(1).start_election(), cluster.node(2).start_election());
    sleep(Duration::from_millis(20)).await;

    for id in [1, 2] {
        let status = cluster.node(id).status().await;
        assert_eq!(status.role, Role::Candidate);
        assert_eq!(status.term, 1);
        assert_eq!(status.voted_for, Some(id));
    }

    // Node 1 times out first and retries with a fresh term.
    cluster.node(1).start_election().await;

    let leader = wait_until(cluster.node(1), Duration::from_secs(1), |s| s.role == Role::Leader).await;
    assert_eq!(leader.term, 2);
    let follower = wait_until(cluster.node(2), Duration::from_secs(1), |s| s.leader_id == Some(1)).await;
    assert_eq!(follower.role, Role::Follower);
    assert_eq!(follower.term, 2);
    assert_eq!(follower.voted_for, Some(1));
}

#[tokio::test]
async fn heartbeats_hold_off_elections() {
    let cluster = Cluster::new(3, 50, 100);
    cluster.isolate(1);
    cluster.node(1).start().await;
    let follower = cluster.node(1);

    // Keep pinging well inside the timeout window.
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(400) {
        follower
            .handle(RpcMessage::AppendEntries(AppendEntriesArgs {
                term: 1,
                leader_id: 2,
                entries: Vec::new(),
            }))
            .await;
        sleep(Duration::from_millis(10)).await;
    }
    let status = follower.status().await;
    assert_eq!(status.role, Role::Follower);
    assert_eq!(status.term, 1);
    assert_eq!(status.leader_id, Some(2));

    // Silence lets the timer fire.
    let status = wait_until(follower, Duration::from_secs(1), |s| s.role == Role::Candidate).await;
    assert!(status.term >= 2);
}

#[tokio::test]
async fn duplicate_vote_request_changes_nothing() {
    let cluster = Cluster::new(3, 300, 600);
    cluster.node(1).start_election().await;
    settle_leader(&cluster, 1).await;

    // A repeated request for the election already won changes nothing.
    let term = cluster.node(1).status().await.term;
    let before = cluster.statuses().await;
    cluster
        .node(3)
        .handle(RpcMessage::RequestVote(RequestVoteArgs {
            term,
            candidate_id: 1,
        }))
        .await;
    let after = cluster.statuses().await;

    assert_eq!(before, after);
}
