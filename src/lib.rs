//! Ballot session core
//!
//! Signs users in and out of the Ballot prediction app and keeps their
//! session alive: short-lived access tokens are re-minted from a long-lived
//! refresh token for as long as that refresh token is registered in the
//! backend revocation ledger.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ballot_session::prelude::*;
//!
//! # async fn example() -> ballot_session::error::Result<()> {
//! let config = SessionConfig::from_env()?;
//! let controller = Arc::new(SessionController::from_config(&config)?);
//! controller.start();
//!
//! let mut states = controller.watch();
//! let state = states.wait_for(|state| !state.is_loading_auth).await;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod session;
pub mod util;
