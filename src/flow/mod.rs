//! Login orchestration
//!
//! [`AuthFlow`] runs the callback leg as an explicit, forward-only state
//! machine ([`FlowProgress`]); every stage returns `Result<_, AuthFlowError>`
//! and the first error ends the attempt.

pub mod controller;
pub mod state;

pub use controller::{AuthFlow, FlowOutcome, LoginRedirect};
pub use state::{FlowFailure, FlowProgress, FlowStage};
