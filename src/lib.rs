pub mod artifacts;
pub mod config;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod harness;
pub mod ingest;
pub mod logging;
pub mod match_db;
pub mod match_store;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod predictor;
pub mod scoreline;
pub mod splitter;
pub mod targets;
pub mod team_state;
