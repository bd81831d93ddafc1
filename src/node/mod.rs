//! Node module for validating and classifying proxy node configs
//!
//! This module provides functionality for:
//! - Parsing raw candidate strings into protocol/host/port
//! - Deduplicating cosmetically distinct candidates
//! - Probing transport reachability with bounded concurrency
//! - Geolocation enrichment through a capacity-bounded cache
//! - Classifying survivors into protocol and country buckets
//! - Harvesting raw candidates from remote text sources

pub mod classify;
pub mod engine;
pub mod geo;
pub mod harvest;
pub mod models;
pub mod parser;
pub mod probe;

pub use classify::{ClassificationPipeline, ClassificationResult, ClassifyConfig, CountryRule};
pub use engine::{sorted_by_delay, valid_candidates, EngineConfig, ValidationEngine};
pub use geo::{CountryLookup, GeoCache, GeoConfig, GeoResolver, HttpCountryLookup};
pub use harvest::{load_urls_file, Harvester, HarvesterConfig};
pub use models::{ParsedInfo, ProbeOutcome, ProbeResult, Protocol};
pub use parser::{is_plausible, ConfigParser, Deduplicator, IdentityResolver};
pub use probe::{Dial, ProbeConfig, Prober, Resolve, SystemResolver, TcpDialer, TcpProber};
