// The two external surfaces of the core:
//  - rpc: newline-delimited JSON-RPC over stdio for model agents
//  - http: read API plus a long-lived SSE stream for the dashboard
// Both are thin adapters over pal-services; neither owns business logic.

pub mod http;
pub mod rpc;

pub use http::{router, serve_http};
pub use rpc::{run_stdio_server, ToolServer};
