// src/lib.rs

pub mod actions;
pub mod batch;
pub mod batch_writer;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod invoice_cache;
pub mod matching;
pub mod models;
pub mod progress;
pub mod queue;
pub mod worker;

pub use config::{MatcherConfig, WorkerConfig};
pub use db::PgPool;
pub use error::PipelineError;
