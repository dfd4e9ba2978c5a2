//! # rollcall-server
//!
//! HTTP server library for the rollcall proximity attendance system.
//!
//! This library provides the API handlers, shared state, logging setup and
//! the HTTP attendance sink.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod sink;
pub mod state;
