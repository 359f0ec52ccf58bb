//! web-jockey - a configuration-driven local gateway
//!
//! This library provides a small gateway process that:
//! - Serves static file trees mounted at configured URL prefixes
//! - Reverse-proxies other prefixes to upstream HTTP services
//! - Launches and supervises auxiliary child processes, streaming their
//!   output into the gateway's structured log
//! - Routes by longest matching mount prefix, logging every request
//!
//! Routes, subprocesses, port, and directories come from one YAML config
//! file validated at startup; nothing mutates at runtime.

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod router;
pub mod server;
pub mod static_files;
pub mod supervisor;
