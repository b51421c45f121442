use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Unknown node id {0}: not present in the peer table")]
    UnknownNode(u64),

    #[error("Invalid peer entry '{0}', expected <id>=<host:port>")]
    InvalidPeer(String),

    #[error("Invalid election timeout range {min}..{max} ms")]
    InvalidTimeoutRange { min: u64, max: u64 },

    #[error("RPC timeout must be greater than zero")]
    ZeroRpcTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Frame of {0} bytes exceeds the 1 MiB limit")]
    FrameTooLarge(usize),

    #[error("RPC to {0} timed out")]
    Timeout(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

pub type Result<T> = std::result::Result<T, RaftError>;
