//! Hermes API Library Crate
//!
//! The HTTP surface of the assessment service: configuration, the Postgres
//! store, the live-session registry, handlers and routing. The `api` binary is
//! a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
