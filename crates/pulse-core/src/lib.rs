//! # pulse-core
//!
//! Foundation types shared by every Pulse crate:
//!
//! - **Branded IDs**: `ConsumerId`, `UserId` as newtypes for type safety
//! - **Session**: the access/refresh token pair plus identity and tier
//! - **Market data**: `PriceUpdate` and ticker normalisation
//! - **Errors**: the `AuthError` / `TransportError` / `SubscriptionError` taxonomy
//! - **Retry**: reconnect backoff configuration and delay math
//! - **Logging**: subscriber initialisation and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod market;
pub mod retry;
pub mod session;

pub use errors::{AuthError, ErrorCategory, SubscriptionError, TransportError};
pub use ids::{ConsumerId, UserId};
pub use market::{PriceUpdate, normalize_ticker, normalize_tickers};
pub use retry::BackoffConfig;
pub use session::{Session, Tier, calculate_expires_at, now_ms};
