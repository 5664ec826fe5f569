pub mod canonical;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod generator;
pub mod guard;
pub mod intent;
pub mod orchestrator;
pub mod prune;
pub mod rewrite;
pub mod router;
pub mod vocab;

pub use config::AppConfig;
pub use db::{QueryResult, QueryStatus};
pub use domain::{Dialect, Domain, ExecutionTarget, SqlCandidate};
pub use error::PipelineError;
pub use orchestrator::{Answer, Orchestrator};
