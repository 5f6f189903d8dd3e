//! Core types and trait definitions for the Vouch verification engine.
//!
//! No HTTP or database dependencies live here. Consent grants, check
//! outcomes and verification sessions are plain data with their state
//! machines as methods; persistence, screening and delivery are traits.

// Store traits use native `async fn`-style RPITIT; the futures are `Send`.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod check;
pub mod clock;
pub mod consent;
pub mod error;
pub mod screener;
pub mod session;
pub mod store;

pub use error::{Error, Result};
