//! # pulse-auth
//!
//! Session lifecycle for the Pulse client.
//!
//! - [`TokenStore`]: in-memory session holder with change listeners and an
//!   optional durable mirror
//! - [`SessionFile`]: the mirror, a `0600` JSON file keyed by namespace
//! - [`AuthApi`] / [`HttpAuthApi`]: the `/auth/*` REST surface
//! - [`SessionManager`]: login, register, logout, and single-flight refresh

#![deny(unsafe_code)]

pub mod api;
pub mod errors;
pub mod manager;
pub mod storage;
pub mod store;

pub use api::{AuthApi, Credentials, HttpAuthApi, RegistrationDetails, TokenGrant, UserProfile};
pub use errors::StorageError;
pub use manager::{SessionConfig, SessionManager, SessionState};
pub use storage::SessionFile;
pub use store::{ListenerId, TokenStore};
