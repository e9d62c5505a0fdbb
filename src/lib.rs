//! Tierflow - cost-aware multi-stage workflow engine
//!
//! Runs ordered stages of LLM work, routing each stage to the cheapest
//! capability tier that fits it, serving repeated requests from a
//! fingerprint cache, accounting cost against an all-premium baseline and
//! keeping a durable, queryable run history with per-stage quality.

pub mod accounting;
pub mod cache;
pub mod cli;
pub mod config;
pub mod executor;
pub mod history;
pub mod logging;
pub mod quality;
pub mod routing;
pub mod upstream;
pub mod workflow;
