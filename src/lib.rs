#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the memberbridge application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod directory;
pub mod error;
pub mod flow;
pub mod handlers;
pub mod models;
pub mod oauth;
pub mod session;
pub mod settings;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

/// Re-export commonly used items
pub use error::AuthFlowError;
pub use flow::{AuthFlow, FlowOutcome, FlowStage};
pub use handlers::configure_routes;
pub use models::{AppSession, SessionEstablishmentResult, SessionMechanism};
pub use settings::BridgeSettings;
