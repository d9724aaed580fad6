//! HTTP request subsystem.
//!
//! # Data Flow
//! ```text
//! Session layer
//!     → request.rs (RequestDescriptor, metadata → headers)
//!     → context.rs (aggressive cache / disable caching / timeout overrides)
//!     → executor.rs (cache consult, retries, profiling)
//!         → codec.rs (gzip request, gzip/deflate response)
//!         → auth.rs (401/412 retry decision, 403 notification)
//!         → transport.rs (reqwest, or a scripted transport in tests)
//!     → response.rs (HttpResponse or typed ClientError)
//! ```
//!
//! # Design Decisions
//! - The executor is shared across sessions; the context is per call chain
//! - Transport failures are returned untouched so failover can classify them
//! - Custom verbs (EVAL, RESET) travel through the same transport

pub mod auth;
pub mod codec;
pub mod context;
pub mod executor;
pub mod headers;
pub mod request;
pub mod response;
pub mod transport;

pub use auth::{ApiKeyAuthentication, AuthenticationHandler, Conventions, DefaultConventions, NoAuthentication};
pub use context::{ContextScope, RequestContext};
pub use executor::{ConfigureRequestArgs, RequestExecutor};
pub use headers::Headers;
pub use request::{BodySource, Credentials, FileBodySource, HttpMethod, RequestBody, RequestDescriptor};
pub use response::{HttpResponse, RawResponse};
pub use transport::{ReqwestTransport, Transport, TransportBody, TransportRequest, TransportResponse};
