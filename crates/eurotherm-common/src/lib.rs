#![doc = "Shared data model, units, configuration schema and error types for the Eurotherm supervisory service."]

pub mod config;
pub mod error;
pub mod process_values;
pub mod quantity;
pub mod status;
pub mod worker_state;

pub use config::*;
pub use error::*;
pub use process_values::*;
pub use quantity::*;
pub use status::*;
pub use worker_state::*;
