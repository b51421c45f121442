pub mod config;
pub mod core_types;
pub mod error;
pub mod node;
pub mod timer;
pub mod transport;

pub use config::NodeConfig;
pub use core_types::{NodeStatus, Role, RpcMessage};
pub use error::{RaftError, Result};
pub use node::RaftNode;
pub use transport::{RpcHandler, TcpTransport, Transport};
