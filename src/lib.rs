//! Ingestion engine library surface: channel refresh, download/transcode
//! pipeline, retention, and the admin operations an (out-of-scope) HTTP
//! layer would call.

pub mod admin;
pub mod clients;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod refresh;
pub mod retention;
pub mod retry;
pub mod store;
pub mod workers;

pub use admin::AdminService;
pub use concurrency::ConcurrencyGate;
pub use config::Settings;
pub use errors::{CoreError, CoreResult, ErrorKind};
pub use metrics::Metrics;
pub use pipeline::Pipeline;
pub use queue::QueueService;
pub use refresh::RefreshService;
pub use retention::RetentionService;
pub use store::Store;
