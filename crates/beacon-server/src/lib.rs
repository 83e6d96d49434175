//! # beacon-server
//!
//! HTTP server library for the beacon-tracker service.
//!
//! This library provides the API handlers, logging setup and state wiring;
//! the `beacon-server` binary only loads configuration and serves.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
