use sluice::BlockError;

/// Errors produced by the gate middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    /// The runtime rejected the request before the inner service ran.
    ///
    /// The wrapped [`BlockError`] names the rule and resource that decided.
    #[error("request blocked: {0}")]
    Blocked(#[source] BlockError),
}

impl GateError {
    /// The admission decision behind this error.
    pub fn block(&self) -> &BlockError {
        match self {
            Self::Blocked(err) => err,
        }
    }
}

impl From<BlockError> for GateError {
    fn from(err: BlockError) -> Self {
        Self::Blocked(err)
    }
}
