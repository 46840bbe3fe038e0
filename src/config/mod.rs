//! Gateway process configuration: models, file/env loading, validation.
pub mod loader;
pub mod models;
pub mod validation;

pub use models::GatewayConfig;
pub use validation::{ConfigValidator, ValidationError};
