//! HealBot client crate - wire format, the `RemoteService` seam, and its
//! reqwest-backed HTTP implementation.
//!
//! Includes a scripted in-memory service for exercising the conversation
//! flow without a running backend.

pub mod http;
pub mod mock;
pub mod service;
pub mod wire;

pub use http::HttpServiceClient;
pub use mock::{MockCall, MockFailure, MockRemoteService};
pub use service::{join_audio_url, RemoteService, ServiceStatus};
pub use reqwest::Url;
