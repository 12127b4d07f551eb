mod handlers;
mod server;

pub use server::{router, ServerState, StreamServer, StreamServerBuilder};
