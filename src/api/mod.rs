pub mod handler;
pub mod identity;
pub mod middleware;
pub mod server;
