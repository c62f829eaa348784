//! Signal Gate
//!
//! Scores OHLCV bar series per (instrument, interval), runs the result
//! through a chain of quality gates, attaches exit levels and a probability
//! estimate, and decides whether to alert, warn or stay quiet under
//! per-key cooldowns and a daily alert budget.

pub mod alignment;
pub mod analyzers;
pub mod budget;
pub mod config;
pub mod cooldown;
pub mod data;
pub mod gates;
pub mod indicators;
pub mod pipeline;
pub mod probability;
pub mod risk;
pub mod scanner;
pub mod scoring;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use pipeline::{Evaluation, Pipeline};
pub use types::*;
