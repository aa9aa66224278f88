//! # Data Retrieval Module
//!
//! HTTP clients of the engine's outside world.
//!
//! - **`ky_http`**: a generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with optional retries of transient failures. It maps
//!   transport failures onto [`crate::errors::SyncError`].
//! - **`comlink`**: the content service client; implements the `SegmentFetcher`
//!   and `PlayerSource` seams.
//! - **`webhook`**: the Discord-style notification sink.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// Content service client.
pub mod comlink;
/// Webhook notification transport.
pub mod webhook;

pub use comlink::ComlinkClient;
pub use ky_http::{ApiClient, ApiResponse};
pub use webhook::{WebhookMessage, WebhookSink};
