//! Request pipeline decorators.
//!
//! Each decorator is a tower [`Layer`](tower::Layer) over services of
//! `RequestContext -> Result<ApiReply, Fault>`:
//!
//! - **Exception boundary**: renders every fault as an error envelope
//! - **Request logging**: one start and one completion record per request
//! - **Required fields**: rejects incomplete payloads with a validation error
//! - **Rate limiting**: fixed-window quota per user or client address
//!
//! # Architecture
//!
//! ```text
//! Request → Exceptions → Logging → Rate Limit → Required Fields → Handler
//!               ↑            ↓          ↓               ↓
//!         error envelope  2 records  429 fault     400 fault
//! ```
//!
//! The order of the inner three is chosen per endpoint with
//! [`Pipeline`](crate::pipeline::Pipeline); the exception boundary is always
//! outermost.

pub mod exceptions;
pub mod fields;
pub mod ip;
pub mod logging;
pub mod rate_limit;

use std::future::Future;
use std::pin::Pin;

pub use exceptions::{ExceptionLayer, ExceptionService, FaultScope, handle_exceptions, render_fault};
pub use fields::{RequiredFieldsLayer, RequiredFieldsService, require_fields};
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, extract_client_ip};
pub use logging::{RequestLogLayer, RequestLogService, log_requests};
pub use rate_limit::{RateLimitLayer, RateLimitService, rate_limit};

/// Boxed future returned by every pipeline service.
pub(crate) type LayerFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
