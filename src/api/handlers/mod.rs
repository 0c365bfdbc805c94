//! Route handlers.
//!
//! Everything auth lives under [`auth`]; `health` and `root` are the only
//! unauthenticated infrastructure endpoints.

pub mod auth;
pub mod health;
pub mod root;
