//! Unified testing utilities
//!
//! - [`fixtures`] - Signing keys, ID token minting, settings for mock servers
//! - [`mock`] - In-memory directory, scripted session issuer, mock identity provider

pub mod fixtures;
pub mod mock;

pub use fixtures::TestFixtures;
