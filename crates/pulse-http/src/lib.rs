//! # pulse-http
//!
//! Every outbound call goes through [`RequestPipeline::execute`]:
//!
//! 1. attach `Authorization: Bearer <access token>` (unless `skip_auth`)
//! 2. on 401, refresh through the shared refresh cycle and retry once
//! 3. classify everything else into [`pulse_core::TransportError`]; no retries

#![deny(unsafe_code)]

pub mod errors;
pub mod pipeline;
pub mod request;

pub use errors::PipelineError;
pub use pipeline::{PipelineConfig, RequestPipeline};
pub use request::{ApiRequest, ApiResponse};
