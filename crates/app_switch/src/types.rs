//! Data model of the handshake.

use std::collections::HashSet;

use masking::{Secret, StrongSecret};
use serde::{Deserialize, Serialize};
use switch_env::Env;

use crate::errors::SwitchError;

/// One authorization attempt, immutable once handed to the handshake.
///
/// Discarded after use; nothing in here survives the switch. Whatever must
/// survive lives in [`CorrelationState`].
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    /// Gateway environment this attempt runs against.
    pub environment: Env,
    /// Client identifier registered with the gateway.
    pub client_id: String,
    /// Locally generated token bound to this attempt.
    pub correlation_token: Secret<String>,
    /// Scopes requested from the external actor, if any.
    pub scopes: Option<HashSet<String>>,
    /// Where the external actor returns on approval.
    pub success_url: String,
    /// Where the external actor returns on cancellation.
    pub cancel_url: String,
    /// Additional key/value attributes forwarded to the gateway.
    pub additional_params: Vec<(String, String)>,
    /// Freshly generated symmetric key. Presence selects the encrypted
    /// payload variant; absence selects the plain variant.
    pub symmetric_key: Option<StrongSecret<Vec<u8>>>,
}

impl AuthorizationRequest {
    /// Generate a fresh correlation token for a new attempt.
    pub fn generate_correlation_token() -> Secret<String> {
        Secret::new(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// What the handshake persists before switching away.
///
/// Written immediately before control transfer, read back (and invalidated)
/// exactly once on return. For plain flows `token` holds the correlation
/// token; for encrypted flows it holds the envelope GUID and
/// `symmetric_key` is present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelationState {
    /// Correlation token or envelope GUID.
    pub token: Secret<String>,
    /// Symmetric key for decrypting the return payload (encrypted variant).
    pub symmetric_key: Option<StrongSecret<Vec<u8>>>,
    /// Installation GUID of this SDK instance.
    pub install_guid: String,
}

/// Raw gateway response handed back by the dispatch layer.
#[derive(Clone, Debug)]
pub struct GatewayResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers, when the transport exposes them.
    pub headers: Option<http::HeaderMap>,
    /// Response body, verbatim.
    pub body: bytes::Bytes,
}

/// Kind of value a successful handshake produced.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseType {
    /// An authorization code to exchange for a token.
    AuthorizationCode,
    /// A web URL the host must load to finish authorization.
    WebUrl,
    /// The verbatim return URL of a plain-variant flow.
    ReturnUrl,
}

/// Terminal result of one handshake attempt. Exactly one is delivered per
/// attempt, through the completion context.
#[derive(Debug)]
pub enum SwitchOutcome {
    /// The external actor approved and the response authenticated.
    Success {
        /// What `payload` contains.
        response_type: ResponseType,
        /// Authorization code, web URL or verbatim return URL.
        payload: String,
        /// Identity (email) of the approving account, when the actor
        /// disclosed it.
        identity: Option<String>,
    },
    /// The external actor returned without approving. Not an error; hosts
    /// should return to the previous screen silently.
    Cancel,
    /// The attempt failed; see the report's current context for the
    /// taxonomy variant.
    Error(error_stack::Report<SwitchError>),
}

impl SwitchOutcome {
    /// Whether this outcome is the success case.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Collapse into a `Result` for callers that treat cancellation as an
    /// error. Cancellation maps to [`SwitchError::UserCanceled`] and stays
    /// distinguishable from every failure case.
    pub fn into_result(
        self,
    ) -> Result<(ResponseType, String, Option<String>), error_stack::Report<SwitchError>> {
        match self {
            Self::Success {
                response_type,
                payload,
                identity,
            } => Ok((response_type, payload, identity)),
            Self::Cancel => Err(error_stack::report!(SwitchError::UserCanceled)),
            Self::Error(report) => Err(report),
        }
    }
}

/// What the external actor sent back.
#[derive(Debug)]
pub enum SwitchReturn {
    /// A deep-link URL delivered to the host application.
    DeepLink(String),
    /// An extras bundle delivered by a wallet application.
    WalletExtras(WalletReturnBundle),
}

/// Extras bundle a wallet application hands back, untrusted until
/// reconciled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletReturnBundle {
    /// Installation GUID echoed back by the wallet.
    pub app_guid: String,
    /// Client metadata identifier, if the wallet echoes it.
    #[serde(default)]
    pub client_metadata_id: Option<String>,
    /// Client identifier the wallet acted for.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Display name of the initiating application.
    #[serde(default)]
    pub app_name: Option<String>,
    /// Environment the wallet ran against.
    #[serde(default)]
    pub environment: Option<String>,
    /// Gateway URL of that environment.
    #[serde(default)]
    pub environment_url: Option<String>,
    /// `code`, `web`, or `cancel`.
    #[serde(default)]
    pub response_type: Option<String>,
    /// Granted scope set, space separated.
    #[serde(default)]
    pub scope: Option<String>,
    /// Follow-up web URL, for web response types.
    #[serde(default, rename = "webURL")]
    pub web_url: Option<String>,
    /// Authorization code, for code response types.
    #[serde(default)]
    pub authorization_code: Option<Secret<String>>,
    /// Account email, when disclosed.
    #[serde(default)]
    pub email: Option<String>,
    /// Error reported by the wallet, empty or absent on success.
    #[serde(default)]
    pub error: Option<String>,
}
