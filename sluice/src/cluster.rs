//! Interface to an external cluster token server. The transport lives
//! outside this crate; flow checking only needs the request/answer contract
//! and falls back to local evaluation when the server cannot decide.

/// Answer of the token server for one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenResult {
    /// Token granted.
    Ok,
    /// Token granted for a future window; sleep `wait_ms`, then proceed.
    ShouldWait { wait_ms: u64 },
    /// Token denied.
    Blocked,
    /// The server has no rule for this flow id.
    NoRuleExists,
    /// The request was malformed.
    BadRequest,
    /// Server-side failure.
    Fail,
    /// The server itself is overloaded.
    TooManyRequests,
}

/// Client of a remote (or embedded) token server.
pub trait TokenService: Send + Sync + std::fmt::Debug {
    fn request_token(&self, flow_id: u64, count: u32, prioritized: bool) -> TokenResult;
}
