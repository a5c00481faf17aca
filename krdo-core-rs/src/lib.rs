//! KRDO Core Library
//!
//! Simulated cluster of peer processes with bully coordinator election
//! and coordinator-pull clock synchronization. Every node is a
//! single-writer tokio task; peers exchange messages through bounded
//! in-process mailboxes.

pub mod types;
pub mod error;
pub mod config;
pub mod clock;
pub mod mailbox;
pub mod registry;
pub mod node;
pub mod cluster;

pub use types::*;
pub use error::ClusterError;
pub use config::ClusterConfig;
pub use cluster::Cluster;
