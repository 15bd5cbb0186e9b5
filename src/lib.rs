//! Agent service lifecycle backend
//!
//! Drives agent services through mint, activation, registration, deployment
//! and staking on a ledger, persisting progress so every operation can be
//! resumed after a failure.

pub mod chains;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod services;
pub mod storage;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod middleware;
