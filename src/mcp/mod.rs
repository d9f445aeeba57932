//! MCP Host (C4, §4.4): external content-processor supervision over a
//! hand-rolled JSON-RPC 2.0 stdio channel.

mod descriptor;
mod host;
mod protocol;

pub use descriptor::{McpServerDescriptor, ServerHealth, Transport};
pub use host::McpHost;
pub use protocol::{
    parse_incoming, read_line, write_message, IncomingMessage, RpcErrorObject, RpcNotification,
    RpcRequest, RpcResponse, JSONRPC_VERSION,
};
