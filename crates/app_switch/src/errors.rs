//! Error taxonomy for the handshake.

/// Result wrapping the error variant into an `error_stack::Report`.
pub type CustomResult<T, E> = error_stack::Result<T, E>;

/// Every way a handshake attempt can fail.
///
/// The taxonomy is closed: gateway status codes, transport failures and
/// reconciliation outcomes all map onto exactly one of these variants.
/// `UserCanceled` is deliberately part of the enum so hosts can tell it apart
/// from every error case and return to a prior screen silently.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SwitchError {
    /// Connectivity or timeout failure before a response was read. Retryable.
    #[error("Failed to reach the gateway")]
    TransportError,

    /// The gateway answered with a 5xx. Retryable.
    #[error("Gateway returned a server error (HTTP {status_code})")]
    ServerError {
        /// Status code the gateway answered with.
        status_code: u16,
    },

    /// HTTP 429. Terminal, never retried even under a retrying policy.
    #[error("Gateway rate limited the request")]
    RateLimited,

    /// HTTP 401. Terminal.
    #[error("Gateway rejected the client credentials")]
    AuthenticationError,

    /// HTTP 403. Terminal.
    #[error("Gateway refused this operation for the authenticated client")]
    AuthorizationError,

    /// HTTP 400 or 422, carrying whatever detail the gateway provided.
    #[error("Gateway rejected the request as malformed: {detail}")]
    MalformedRequest {
        /// Server-provided detail, verbatim.
        detail: String,
    },

    /// The bounded retry budget ran out. Distinct from the error that
    /// triggered the retries.
    #[error("Retry budget exhausted before the request succeeded")]
    RetryBudgetExceeded,

    /// Returned correlation data disagrees with the persisted handshake
    /// state, or no state was persisted. Fails closed; callers must not
    /// retry.
    #[error("Returned payload does not match the persisted handshake state")]
    CorrelationMismatch,

    /// No configured recipe is usable on this device. A capability result,
    /// not necessarily a user-visible failure.
    #[error("No eligible switch target available on this device")]
    NoEligibleTarget,

    /// The external actor returned to a non-success path or reported no
    /// usable data.
    #[error("User canceled the switch")]
    UserCanceled,

    /// The external actor reported an error of its own in the return
    /// payload.
    #[error("External actor reported an error: {message}")]
    ExternalActorError {
        /// Error message embedded in the decrypted return payload.
        message: String,
    },

    /// Building the outbound switch payload failed.
    #[error("Failed to encode the switch payload")]
    EncodingFailed,

    /// Parsing or decrypting the returned payload failed.
    #[error("Failed to decode the returned payload")]
    DecodingFailed,

    /// The durable correlation store failed an operation.
    #[error("Correlation storage operation failed")]
    StorageFailure,

    /// A URL in the flow could not be parsed.
    #[error("Failed to parse URL")]
    UrlParsingFailed,

    /// The gateway body did not deserialize into the expected shape.
    #[error("Failed to deserialize gateway response")]
    ResponseDeserializationFailed,
}

impl SwitchError {
    /// Whether a retrying policy may schedule another attempt after this
    /// error. Everything else in the taxonomy is terminal, including
    /// `RateLimited`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportError | Self::ServerError { .. })
    }
}
