//! Weaver Gateway — HTTP surface over the run pipeline and stores

pub mod routes;
pub mod server;

pub use server::{start_server, ServerConfig};
