pub mod config;
pub mod context;
pub mod types;

pub use config::{load_config, Config, GateConfig};
pub use context::{Context, Heuristic};
