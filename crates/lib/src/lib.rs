//! Relay core library: channels, correlation engine, config and HTTP gateway
//! used by the `relay` CLI.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod relay;
