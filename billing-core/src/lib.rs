//! billing-core: Shared infrastructure for the invoicing and subscription crates.
pub mod config;
pub mod error;
pub mod events;
pub mod observability;

pub use async_trait;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
