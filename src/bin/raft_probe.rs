use clap::{Parser, Subcommand};
use std::time::Duration;

use raft_election::core_types::{AppendEntriesArgs, RequestVoteArgs};
use raft_election::{RaftError, RpcMessage, TcpTransport, Transport};

/// Sends a single RPC to one node and prints what comes back.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Address of the Raft node to poke (e.g., 127.0.0.1:8001)
    #[clap(short, long, global = true, default_value = "127.0.0.1:8001")]
    address: String,

    #[clap(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show term, role, vote and known leader
    Status,
    /// Ask the node for its vote
    Vote {
        #[clap(long)]
        term: u64,
        #[clap(long)]
        candidate: u64,
    },
    /// Send an empty heartbeat as if from a leader
    Append {
        #[clap(long)]
        term: u64,
        #[clap(long)]
        leader: u64,
    },
}

impl Commands {
    fn into_request(self) -> RpcMessage {
        match self {
            Commands::Status => RpcMessage::Status,
            Commands::Vote { term, candidate } => {
                RpcMessage::RequestVote(RequestVoteArgs { term, candidate_id: candidate })
            }
            Commands::Append { term, leader } => RpcMessage::AppendEntries(AppendEntriesArgs {
                term,
                leader_id: leader,
                entries: Vec::new(),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let transport = TcpTransport::new(Duration::from_millis(cli.timeout_ms));
    let request = cli.command.into_request();
    println!("[probe] sending {} to {}", request.kind(), cli.address);

    match transport.call(&cli.address, request).await? {
        RpcMessage::StatusReply(status) => {
            println!("  Node:      {}", status.id);
            println!("  Term:      {}", status.term);
            println!("  Role:      {:?}", status.role);
            println!("  Voted for: {:?}", status.voted_for);
            println!("  Leader:    {:?}", status.leader_id);
        }
        RpcMessage::RequestVoteReply(reply) => {
            println!("  Term: {}  Vote granted: {}", reply.term, reply.vote_granted);
        }
        RpcMessage::AppendEntriesReply(reply) => {
            println!("  Term: {}  Success: {}", reply.term, reply.success);
        }
        other => return Err(RaftError::UnexpectedReply(other.kind().to_string()).into()),
    }
    Ok(())
}
