mod client;
mod codec;
mod monitor;
mod rpc;
mod transact;

pub use client::{
    Client, ConnectionInfo, ConnectionType, MonitorCallback, Options, SocketSecurity,
};
pub use codec::JsonCodec;
pub use monitor::{MonitorHandle, MonitorRequest, MonitorSelect};
pub use rpc::{Rpc, RpcSink};
pub use transact::{
    Condition, Function, Mutation, Mutator, Operation, OperationResult, TransactBuilder,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection closed before the request completed")]
    ConnectionClosed,
    #[error("request deadline exceeded")]
    Timeout,
    #[error("{0} is not supported by this client")]
    Unimplemented(&'static str),
    #[error("server rejected the request: {0}")]
    OperationFailed(serde_json::Value),
    #[error("failed to decode a server payload: {0}")]
    Parsing(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] ovsdb::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
