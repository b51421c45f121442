use anyhow::Context;
use clap::Parser;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;

use raft_election::config::{
    self, DEFAULT_RPC_TIMEOUT_MS, MAX_ELECTION_TIMEOUT_MS, MIN_ELECTION_TIMEOUT_MS,
};
use raft_election::transport::{self, RpcHandler};
use raft_election::{NodeConfig, RaftNode, TcpTransport};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Raft leader-election node", long_about = None)]
struct Cli {
    /// ID of this server; must appear in the peer table
    #[clap(short, long, default_value_t = 1)]
    id: u64,

    /// Cluster members as id=host:port, comma separated (this node included)
    #[clap(short, long, value_delimiter = ',', value_parser = parse_peer_arg)]
    peers: Vec<(u64, String)>,

    #[clap(long, default_value_t = MIN_ELECTION_TIMEOUT_MS)]
    election_timeout_min_ms: u64,

    /// Exclusive upper bound of the randomized election timeout
    #[clap(long, default_value_t = MAX_ELECTION_TIMEOUT_MS)]
    election_timeout_max_ms: u64,

    #[clap(long, default_value_t = DEFAULT_RPC_TIMEOUT_MS)]
    rpc_timeout_ms: u64,
}

fn parse_peer_arg(entry: &str) -> Result<(u64, String), String> {
    config::parse_peer(entry).map_err(|e| e.to_string())
}

impl Cli {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let peers: BTreeMap<u64, String> = if self.peers.is_empty() {
            config::default_peers()
        } else {
            config::peer_table(self.peers).context("invalid --peers table")?
        };
        Ok(NodeConfig {
            id: self.id,
            peers,
            election_timeout_min_ms: self.election_timeout_min_ms,
            election_timeout_max_ms: self.election_timeout_max_ms,
            rpc_timeout_ms: self.rpc_timeout_ms,
        })
    }
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    config.validate().context("invalid cluster configuration")?;
    let listen_addr = config.listen_addr()?.to_string();

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to listen on {}", listen_addr))?;
    info!("[server {}] listening on {}", config.id, listen_addr);

    let client = Arc::new(TcpTransport::new(config.rpc_timeout()));
    let node = RaftNode::new(&config, client)?;
    let handler: Arc<dyn RpcHandler> = Arc::new(node.clone());
    tokio::spawn(transport::serve(listener, handler));
    node.start().await;

    tokio::signal::ctrl_c().await?;
    info!("[server {}] shutting down", config.id);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    run(Cli::parse().into_config()?).await
}
