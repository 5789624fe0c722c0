mod dto;
mod server;
mod tools;

pub use dto::*;
pub use server::{run_stdio_server, ToolServer};
