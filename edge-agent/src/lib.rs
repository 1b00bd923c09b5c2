//! edge-agent: per-node coordinator for the water-quality edge-inference
//! pipeline. See each module for the component it implements.

pub mod config;
pub mod error;
pub mod ewma;
pub mod orchestrator;
pub mod peer;
pub mod policy;
pub mod slot;
pub mod stage_caller;
pub mod state;
pub mod store;
pub mod transport;
pub mod uploader;

pub use config::{load_config, Config};
pub use error::{ConfigError, StoreError};
pub use state::AgentState;
pub use stage_caller::StageCaller;
pub use store::Store;
