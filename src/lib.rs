//! Concurrent SMTP campaign dispatch and IMAP mailbox verification engine.
//!
//! This crate is a library of operations, not a service: the three `[[bin]]`
//! targets under `src/bin` are thin reference callers that assemble a
//! `JsonFileStore` and drive one campaign, probe, or connectivity check to
//! completion. A real deployment wires the same traits in `store` to whatever
//! persistence and transport layer it already runs.

pub mod campaign;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod imap;
pub mod log;
pub mod model;
pub mod proxy;
pub mod rate;
pub mod retry;
pub mod selector;
pub mod smtp;
pub mod storefile;
pub mod store;
pub mod warmup;
