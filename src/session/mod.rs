//! Session Management Module
//!
//! - [`cookie`] - Sealed cookie creation and reading
//! - [`transaction`] - Login transactions carried between the login redirect and the callback
//! - [`cascade`] - Directory session establishment after a successful login

pub mod cascade;
pub mod cookie;
pub mod transaction;

pub use cascade::SessionCascade;
pub use cookie::{create_expired_cookie, CookieFactory, CookieOptions};
pub use transaction::{AuthTransaction, TransactionStore};
