//! `fetch-executor` issues HTTP requests with resilience policies layered on top.
//!
//! A [`RequestExecutor`] wraps a [`Transport`] and a [`Timer`] and offers:
//! - [`RequestExecutor::execute`] and [`RequestExecutor::execute_with_timeout`]
//! - [`RequestExecutor::execute_with_retry`] with a [`RetryPolicy`]
//! - [`RequestExecutor::execute_cancelable`]
//! - [`RequestExecutor::poll`]
//! - [`RequestExecutor::execute_batch_concurrent`] and
//!   [`RequestExecutor::execute_batch_sequential`]

mod error;
mod executor;
mod options;
mod pending;
mod policy;
mod timer;
mod transport;
mod types;

pub use error::{RequestError, TransportError, TransportErrorKind};
pub use executor::RequestExecutor;
pub use options::{ExecutorOptions, SequentialFailure};
pub use pending::{CancelHandle, PendingRequest, RequestState};
pub use policy::RetryPolicy;
pub use timer::{Timer, TokioTimer};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
pub use types::{Body, PollSession, RequestSpec, Response};

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, RequestError>;
