//! Content pipeline core: context building, topic and variant generation,
//! social correlation, scheduling, the plan state machine and the worker
//! pool that runs each stage.

pub mod cache;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod generator;
pub mod jobs;
pub mod payload;
pub mod pipeline;
pub mod plan_state;
pub mod prompts;
pub mod research;
pub mod review;
pub mod scheduler;
pub mod store;
pub mod topics;
pub mod variants;
pub mod worker;

pub use config::PipelineConfig;
pub use error::StageError;
pub use jobs::{JobHandle, JobOutcome, StageJob};
pub use pipeline::Pipeline;
