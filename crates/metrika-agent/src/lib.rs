//! The metrika agent: samples host metrics and pushes them to the server
//! in signed, optionally compressed batches.

pub mod agent;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod transport;

pub use agent::{Agent, AgentHandle};
pub use config::AgentConfig;
pub use error::DeliveryError;
pub use pipeline::{DeliveryPipeline, DeliveryReport};
