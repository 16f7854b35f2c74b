//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, limits)
//!     → request.rs (claims + conditional headers → RequestContext)
//!     → gateway.rs (admission pipeline, guarded upstream forward)
//!     → response.rs (quota headers, validators, error bodies)
//!     → Send to client
//! ```

pub mod gateway;
pub mod request;
pub mod response;
pub mod server;

pub use gateway::{UpstreamClient, UpstreamRequest};
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer, ServerError};
