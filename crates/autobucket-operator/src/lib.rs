//! autobucket operator: wiring for the bucket and provisioning controllers
//!
//! The binary in `main.rs` is a thin shell over these modules so that the
//! configuration, health endpoints and startup steps can be tested without a
//! cluster.

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod health;
pub mod startup;
