//! collector: reference sink for the edge agent's deduplicated batch
//! uploads. Thin by design (spec §1): no analytics, no query API beyond
//! `/health` and the dedup the upload contract requires.

pub mod config;
pub mod error;
pub mod state;
pub mod store;
pub mod transport;

pub use config::{load_config, Config};
pub use error::{ConfigError, StoreError};
pub use store::Store;
