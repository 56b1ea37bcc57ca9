use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::header::{HeaderName, HeaderValue};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    pending::{CancelHandle, Lifecycle, PendingRequest},
    transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse},
    timer::{Timer, TokioTimer},
    ExecutorOptions, PollSession, RequestError, RequestSpec, Response, Result, RetryPolicy,
    SequentialFailure,
};

/// Issues [`RequestSpec`]s through a [`Transport`] with timeouts, retries,
/// polling, cancellation and batching.
///
/// Cloning is cheap; clones share the transport and timer.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    timer: Arc<dyn Timer>,
    options: ExecutorOptions,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for RequestExecutor {
    fn default() -> Self {
        Self::new(ReqwestTransport::new())
    }
}

impl RequestExecutor {
    /// Creates an executor over `transport`, using tokio timers.
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            transport: Arc::new(transport),
            timer: Arc::new(TokioTimer),
            options: ExecutorOptions::default(),
        }
    }

    /// Replaces the timer used for timeouts, retry waits and poll intervals.
    pub fn with_timer<T>(mut self, timer: T) -> Self
    where
        T: Timer + 'static,
    {
        self.timer = Arc::new(timer);
        self
    }

    /// Applies executor options such as default timeout and headers.
    pub fn with_options(mut self, opts: ExecutorOptions) -> Self {
        self.options = opts;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Performs a single attempt.
    ///
    /// The spec's `timeout_ms` (or the executor default) applies; its
    /// `retry_policy` does not. Use [`send`](Self::send) to honor both.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<Response> {
        self.attempt(spec, self.timeout_for(spec), &CancellationToken::new())
            .await
    }

    /// Performs a single attempt that fails with [`RequestError::Timeout`]
    /// if the transport has not completed within `timeout_ms`.
    ///
    /// On expiry the transport's cancellation token is fired before the
    /// error is returned.
    pub async fn execute_with_timeout(&self, spec: &RequestSpec, timeout_ms: u64) -> Result<Response> {
        self.attempt(spec, Some(timeout_ms), &CancellationToken::new())
            .await
    }

    /// Retries `spec` according to `policy`.
    ///
    /// Failures the policy does not retry are returned as they are. When
    /// every attempt fails, the last error is wrapped in
    /// [`RequestError::RetriesExhausted`].
    pub async fn execute_with_retry(
        &self,
        spec: &RequestSpec,
        policy: &RetryPolicy,
    ) -> Result<Response> {
        self.run_with_retry(spec, policy, &CancellationToken::new())
            .await
    }

    /// Executes `spec` honoring its own timeout and retry policy.
    pub async fn send(&self, spec: &RequestSpec) -> Result<Response> {
        self.dispatch(spec, &CancellationToken::new()).await
    }

    /// Starts `spec` on a background task and returns a handle to its
    /// eventual result plus a separate cancel capability.
    ///
    /// The spec's timeout and retry policy are honored. After a successful
    /// `cancel()`, the handle resolves to [`RequestError::Canceled`] and any
    /// late transport result is discarded.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn execute_cancelable(&self, spec: RequestSpec) -> (PendingRequest, CancelHandle) {
        let lifecycle = Lifecycle::new();
        let (tx, rx) = oneshot::channel();
        let executor = self.clone();
        let task_lifecycle = Arc::clone(&lifecycle);

        lifecycle.start();
        tokio::spawn(async move {
            let result = executor.dispatch(&spec, task_lifecycle.token()).await;
            if task_lifecycle.finish(&result) {
                let _ = tx.send(result);
            }
        });

        (
            PendingRequest::new(Arc::clone(&lifecycle), rx),
            CancelHandle::new(lifecycle),
        )
    }

    /// GETs `target` every `interval_ms` until `predicate` accepts a
    /// successful response.
    ///
    /// Runs without an attempt limit; bound it with
    /// [`poll_session`](Self::poll_session) or by dropping the future.
    pub async fn poll<F>(
        &self,
        target: impl Into<String>,
        interval_ms: u64,
        predicate: F,
    ) -> Result<Response>
    where
        F: Fn(&Response) -> bool,
    {
        self.poll_session(PollSession::new(target, interval_ms, predicate))
            .await
    }

    /// Runs a configured [`PollSession`].
    ///
    /// Transient failures and non-success statuses count as "not yet met".
    /// Malformed requests, non-transient transport faults and the session's
    /// fatal statuses end the poll with that error.
    pub async fn poll_session<F>(&self, session: PollSession<F>) -> Result<Response>
    where
        F: Fn(&Response) -> bool,
    {
        if session.max_attempts == Some(0) {
            return Err(RequestError::InvalidRequest(
                "poll must allow at least one attempt".to_owned(),
            ));
        }

        let spec = RequestSpec::get(session.target.clone());
        let timeout = self.timeout_for(&spec);
        let cancel = CancellationToken::new();
        let interval = Duration::from_millis(session.interval_ms);
        let mut attempts = 0usize;

        loop {
            let outcome = self.attempt(&spec, timeout, &cancel).await;
            attempts += 1;

            let last = match outcome {
                Ok(response) if (session.predicate)(&response) => return Ok(response),
                Ok(response) => Ok(response.status),
                Err(err) if is_fatal_poll_error(&err, &session.fatal_statuses) => {
                    return Err(err)
                }
                Err(err) => Err(err),
            };

            if session.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(match last {
                    Ok(status) => RequestError::ConditionNotMet {
                        attempts,
                        last_status: Some(status),
                    },
                    Err(err) => RequestError::RetriesExhausted {
                        attempts,
                        last: Box::new(err),
                    },
                });
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                "poll condition not met for {} after attempt {}",
                session.target,
                attempts
            );

            self.wait(interval, &cancel).await?;
        }
    }

    /// Issues every spec at once and returns results in input order.
    pub async fn execute_batch_concurrent<I>(&self, specs: I) -> Vec<Result<Response>>
    where
        I: IntoIterator<Item = RequestSpec>,
    {
        let specs: Vec<RequestSpec> = specs.into_iter().collect();
        join_all(specs.iter().map(|spec| self.execute(spec))).await
    }

    /// Issues specs one after another, each only after the previous completes.
    ///
    /// With [`SequentialFailure::Abort`] (the default) the first failure
    /// stops the batch: the returned list ends with that failure and later
    /// specs are never issued. With [`SequentialFailure::Continue`] every
    /// spec is issued and one result is returned per input.
    pub async fn execute_batch_sequential<I>(&self, specs: I) -> Vec<Result<Response>>
    where
        I: IntoIterator<Item = RequestSpec>,
    {
        let specs = specs.into_iter();
        let mut results = Vec::with_capacity(specs.size_hint().0);

        for spec in specs {
            let result = self.execute(&spec).await;
            let failed = result.is_err();
            results.push(result);

            if failed && self.options.sequential_failure == SequentialFailure::Abort {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "sequential batch aborted at index {} ({})",
                    results.len() - 1,
                    spec.target
                );
                break;
            }
        }

        results
    }

    async fn dispatch(&self, spec: &RequestSpec, cancel: &CancellationToken) -> Result<Response> {
        match &spec.retry_policy {
            Some(policy) => self.run_with_retry(spec, policy, cancel).await,
            None => self.attempt(spec, self.timeout_for(spec), cancel).await,
        }
    }

    async fn run_with_retry(
        &self,
        spec: &RequestSpec,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        policy.validate()?;
        let max_attempts = policy.max_attempts();
        let timeout = self.timeout_for(spec);
        let mut attempt = 0usize;

        loop {
            let err = match self.attempt(spec, timeout, cancel).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !policy.should_retry(&err) {
                return Err(err);
            }

            attempt += 1;
            if attempt >= max_attempts {
                return Err(RequestError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = policy.delay_before(attempt);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                "retrying {} {} after {} ms ({err})",
                spec.method,
                spec.target,
                delay.as_millis()
            );

            self.wait(delay, cancel).await?;
        }
    }

    /// One transport call, raced against `timeout_ms` when set.
    async fn attempt(
        &self,
        spec: &RequestSpec,
        timeout_ms: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if cancel.is_cancelled() {
            return Err(RequestError::Canceled);
        }

        let request = self.build_request(spec)?;
        let token = cancel.child_token();
        let call = self.transport.send(request, token.clone());

        let outcome = match timeout_ms {
            None => call.await,
            Some(timeout_ms) => {
                tokio::select! {
                    result = call => result,
                    _ = self.timer.sleep(Duration::from_millis(timeout_ms)) => {
                        token.cancel();

                        #[cfg(feature = "tracing")]
                        tracing::warn!("{} {} timed out after {} ms", spec.method, spec.target, timeout_ms);

                        return Err(RequestError::Timeout { timeout_ms });
                    }
                }
            }
        };

        // A result that lands after cancellation is never surfaced.
        if token.is_cancelled() {
            return Err(RequestError::Canceled);
        }

        match outcome {
            Ok(response) => into_response(response),
            Err(err) => Err(RequestError::Network(err)),
        }
    }

    async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(RequestError::Canceled),
            _ = self.timer.sleep(delay) => Ok(()),
        }
    }

    fn timeout_for(&self, spec: &RequestSpec) -> Option<u64> {
        spec.timeout_ms.or(self.options.default_timeout_ms)
    }

    fn build_request(&self, spec: &RequestSpec) -> Result<TransportRequest> {
        let mut headers: Vec<(String, String)> = self
            .options
            .default_headers
            .iter()
            .filter(|(name, _)| !spec.has_header(name))
            .cloned()
            .collect();
        headers.extend(spec.headers.iter().cloned());

        for (name, value) in &headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                RequestError::InvalidRequest(format!("invalid header name '{name}': {err}"))
            })?;
            HeaderValue::from_str(value).map_err(|err| {
                RequestError::InvalidRequest(format!("invalid value for header '{name}': {err}"))
            })?;
        }

        let body = match &spec.body {
            Some(body) => {
                if !headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                {
                    headers.push(("Content-Type".to_owned(), "application/json".to_owned()));
                }
                Some(body.clone().into_bytes()?)
            }
            None => None,
        };

        Ok(TransportRequest {
            method: spec.method.clone(),
            target: spec.target.clone(),
            headers,
            body,
        })
    }
}

fn into_response(response: TransportResponse) -> Result<Response> {
    let response = Response {
        status: response.status,
        headers: response.headers,
        body: response.body,
    };
    if response.is_success() {
        Ok(response)
    } else {
        Err(RequestError::HttpStatus {
            status: response.status,
            body: response.text(),
        })
    }
}

fn is_fatal_poll_error(err: &RequestError, fatal_statuses: &[u16]) -> bool {
    match err {
        RequestError::Canceled | RequestError::InvalidRequest(_) => true,
        RequestError::Network(err) => !err.is_transient(),
        RequestError::HttpStatus { status, .. } => fatal_statuses.contains(status),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{into_response, is_fatal_poll_error, RequestExecutor};
    use crate::{
        transport::TransportResponse, ExecutorOptions, RequestError, RequestSpec, TransportError,
        TransportErrorKind,
    };

    fn executor() -> RequestExecutor {
        RequestExecutor::default()
    }

    #[test]
    fn json_body_gets_default_content_type() {
        let spec = RequestSpec::post("/x").json(serde_json::json!({"a": 1}));
        let request = executor().build_request(&spec).expect("must build");
        assert_eq!(
            request.headers,
            vec![("Content-Type".to_owned(), "application/json".to_owned())]
        );
        assert_eq!(request.body.as_deref(), Some(br#"{"a":1}"#.as_slice()));
    }

    #[test]
    fn caller_content_type_is_kept() {
        let spec = RequestSpec::post("/x")
            .header("content-type", "text/plain")
            .text("hi");
        let request = executor().build_request(&spec).expect("must build");
        assert_eq!(
            request.headers,
            vec![("content-type".to_owned(), "text/plain".to_owned())]
        );
    }

    #[test]
    fn no_body_means_no_content_type() {
        let request = executor()
            .build_request(&RequestSpec::get("/x"))
            .expect("must build");
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
    }

    #[test]
    fn spec_headers_override_defaults() {
        let executor = executor().with_options(ExecutorOptions {
            default_headers: vec![
                ("Accept".to_owned(), "application/json".to_owned()),
                ("X-Client".to_owned(), "default".to_owned()),
            ],
            ..ExecutorOptions::default()
        });
        let spec = RequestSpec::get("/x").header("x-client", "custom");
        let request = executor.build_request(&spec).expect("must build");
        assert_eq!(
            request.headers,
            vec![
                ("Accept".to_owned(), "application/json".to_owned()),
                ("x-client".to_owned(), "custom".to_owned()),
            ]
        );
    }

    #[test]
    fn invalid_headers_are_rejected_before_sending() {
        let err = executor()
            .build_request(&RequestSpec::get("/x").header("bad header", "v"))
            .expect_err("space in header name must fail");
        assert!(matches!(err, RequestError::InvalidRequest(_)));

        let err = executor()
            .build_request(&RequestSpec::get("/x").header("X-Note", "line\nbreak"))
            .expect_err("newline in header value must fail");
        assert!(matches!(err, RequestError::InvalidRequest(_)));
    }

    #[test]
    fn non_success_status_becomes_http_error() {
        let err = into_response(TransportResponse {
            status: 404,
            headers: Vec::new(),
            body: b"missing".to_vec(),
        })
        .expect_err("404 must fail");
        match err {
            RequestError::HttpStatus { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "missing");
            }
            other => panic!("expected http status error, got {other:?}"),
        }
    }

    #[test]
    fn poll_fatality() {
        let transient = RequestError::Network(TransportError::connect("refused"));
        let malformed = RequestError::Network(TransportError::new(
            TransportErrorKind::Malformed,
            "relative URL without a base",
        ));
        let gone = RequestError::HttpStatus {
            status: 410,
            body: String::new(),
        };
        assert!(!is_fatal_poll_error(&transient, &[]));
        assert!(is_fatal_poll_error(&malformed, &[]));
        assert!(!is_fatal_poll_error(&gone, &[]));
        assert!(is_fatal_poll_error(&gone, &[410]));
    }

    #[test]
    fn debug_lists_options() {
        let debug = format!("{:?}", executor());
        assert!(debug.contains("RequestExecutor"));
        assert!(debug.contains("options"));
    }
}
