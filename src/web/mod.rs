//! Web Module - HTTP surface

pub mod server;

pub use server::start_server;
