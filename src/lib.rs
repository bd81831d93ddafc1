//! nodesift - node config harvester, deduplicator, checker and classifier
//!
//! Ingests raw proxy/node connection strings, collapses cosmetic
//! duplicates, concurrently verifies transport reachability, optionally
//! enriches reachable nodes with coarse geolocation, and partitions the
//! survivors into protocol- and country-based result sets.

pub mod node;

pub use node::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
