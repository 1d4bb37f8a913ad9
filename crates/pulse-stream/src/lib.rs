//! # pulse-stream
//!
//! One server-push channel shared by every consumer.
//!
//! - [`sse`]: `text/event-stream` framing
//! - [`wire`]: typed events (`price_update`, `subscription_error`)
//! - [`connector`]: opening the channel through the request pipeline
//! - [`controller`]: the connection state machine with bounded backoff
//! - [`multiplexer`]: consumer interest sets, ref-counted by consumer

#![deny(unsafe_code)]

pub mod backoff;
pub mod connector;
pub mod controller;
pub mod multiplexer;
pub mod sse;
pub mod wire;

pub use backoff::Backoff;
pub use connector::{EventStream, PipelineConnector, StreamConnector, encode_topics};
pub use controller::{ConnectionController, ConnectionSnapshot, ConnectionState, ControllerConfig};
pub use multiplexer::{Delivery, SubscriptionHandle, SubscriptionMultiplexer};
pub use sse::{SseEvent, parse_sse_events};
pub use wire::{StreamEvent, decode_event};
