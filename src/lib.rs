pub mod agents;
pub mod config;
pub mod error;
pub mod filters;
pub mod indexer;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod store;

pub use config::AppConfig;
pub use error::{Result, ReviewError};
