/// What a sequential batch does after an item fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SequentialFailure {
    /// Stop issuing further items; the failing item's result is the last one returned.
    #[default]
    Abort,
    /// Keep issuing every item and return one result per input.
    Continue,
}

/// Configures executor-wide defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutorOptions {
    /// Per-attempt timeout in milliseconds for specs that carry none.
    pub default_timeout_ms: Option<u64>,
    /// Headers sent with every request unless the spec overrides them.
    pub default_headers: Vec<(String, String)>,
    /// Failure handling for [`execute_batch_sequential`](crate::RequestExecutor::execute_batch_sequential).
    pub sequential_failure: SequentialFailure,
}
