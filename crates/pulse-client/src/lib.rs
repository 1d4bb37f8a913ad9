//! # pulse-client
//!
//! One owned context per process. [`PulseContext`] builds the token store,
//! session manager, request pipeline, and subscription multiplexer from a
//! [`pulse_settings::PulseSettings`] and hands out references to them.

#![deny(unsafe_code)]

pub mod context;

pub use context::{PulseContext, session_file_path};
