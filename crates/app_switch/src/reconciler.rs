//! Return half of the switch payload state machine.
//!
//! Everything arriving here is untrusted: a deep link any application could
//! have crafted, or an extras bundle from whatever answered the wallet
//! intent. The persisted correlation state is the only authority. It is
//! consumed (read once, invalidated) before any branch is taken, so a
//! replayed response finds nothing to match against.

use base64::Engine;
use error_stack::report;
use masking::{ExposeInterface, PeekInterface};
use switch_env::logger;

use crate::{
    consts,
    crypto::{DecodeMessage, GcmAes256},
    errors::SwitchError,
    storage::CorrelationStore,
    types::{CorrelationState, ResponseType, SwitchOutcome, SwitchReturn, WalletReturnBundle},
};

/// Encrypted-variant return carrier: the GUID in the clear, the response
/// sealed under the persisted symmetric key.
#[derive(Debug, serde::Deserialize)]
struct EncryptedReturn {
    msg_guid: String,
    response: String,
}

/// What the sealed response decrypts to.
#[derive(Debug, serde::Deserialize)]
struct DecryptedReturn {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    authorization_code: Option<String>,
    #[serde(default, rename = "webURL")]
    web_url: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Validates, decrypts and classifies what the external actor sent back.
pub struct ResponseReconciler {
    store: std::sync::Arc<dyn CorrelationStore>,
}

impl std::fmt::Debug for ResponseReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseReconciler").finish_non_exhaustive()
    }
}

impl ResponseReconciler {
    pub fn new(store: std::sync::Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }

    /// Produce the terminal outcome for one return. The persisted state for
    /// `flow_key` is cleared whatever branch is taken.
    pub async fn reconcile(
        &self,
        flow_key: &str,
        returned: SwitchReturn,
        success_url: &str,
    ) -> SwitchOutcome {
        // Single use: read and invalidate before any classification.
        let state = match self.store.consume(flow_key).await {
            Ok(state) => state,
            Err(error) => return SwitchOutcome::Error(error),
        };

        match returned {
            SwitchReturn::DeepLink(raw_url) => {
                self.reconcile_deep_link(flow_key, &raw_url, state, success_url)
            }
            SwitchReturn::WalletExtras(bundle) => {
                self.reconcile_wallet(flow_key, bundle, state)
            }
        }
    }

    fn reconcile_deep_link(
        &self,
        flow_key: &str,
        raw_url: &str,
        state: Option<CorrelationState>,
        success_url: &str,
    ) -> SwitchOutcome {
        let returned_url = match url::Url::parse(raw_url) {
            Ok(parsed) => parsed,
            Err(error) => {
                return SwitchOutcome::Error(
                    report!(error).change_context(SwitchError::DecodingFailed),
                )
            }
        };

        // Returning anywhere but the success path is the user backing out,
        // not a failure, whatever the query string says.
        if !returns_to_success_path(&returned_url, success_url) {
            logger::info!(flow_key, "Return path is not the success path");
            return SwitchOutcome::Cancel;
        }

        let Some(state) = state else {
            logger::warn!(flow_key, "Return with no persisted correlation state");
            return SwitchOutcome::Error(report!(SwitchError::CorrelationMismatch));
        };

        match &state.symmetric_key {
            None => Self::reconcile_plain(raw_url, &returned_url, &state),
            Some(_) => Self::reconcile_encrypted(&returned_url, &state),
        }
    }

    fn reconcile_plain(
        raw_url: &str,
        returned_url: &url::Url,
        state: &CorrelationState,
    ) -> SwitchOutcome {
        let returned_token = returned_url
            .query_pairs()
            .find(|(name, _)| name == consts::CORRELATION_TOKEN_PARAM)
            .map(|(_, value)| value.into_owned());

        match returned_token {
            Some(token) if &token == state.token.peek() => SwitchOutcome::Success {
                response_type: ResponseType::ReturnUrl,
                payload: raw_url.to_string(),
                identity: None,
            },
            _ => SwitchOutcome::Error(report!(SwitchError::CorrelationMismatch)),
        }
    }

    fn reconcile_encrypted(returned_url: &url::Url, state: &CorrelationState) -> SwitchOutcome {
        let carrier = returned_url
            .query_pairs()
            .find(|(name, _)| name == consts::PAYLOAD_PARAM)
            .map(|(_, value)| value.into_owned());
        let Some(carrier) = carrier else {
            return SwitchOutcome::Error(report!(SwitchError::DecodingFailed));
        };

        let parsed: EncryptedReturn = match consts::BASE64_ENGINE
            .decode(carrier.as_bytes())
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
        {
            Some(parsed) => parsed,
            None => return SwitchOutcome::Error(report!(SwitchError::DecodingFailed)),
        };

        // GUID validation precedes and gates decryption: nothing sealed is
        // opened until the return is bound to this attempt.
        if &parsed.msg_guid != state.token.peek() {
            return SwitchOutcome::Error(report!(SwitchError::CorrelationMismatch));
        }
        let Some(symmetric_key) = &state.symmetric_key else {
            return SwitchOutcome::Error(report!(SwitchError::CorrelationMismatch));
        };

        let sealed = match consts::BASE64_ENGINE.decode(parsed.response.as_bytes()) {
            Ok(sealed) => sealed,
            Err(_) => return SwitchOutcome::Error(report!(SwitchError::DecodingFailed)),
        };
        let plaintext = match GcmAes256.decode_message(symmetric_key.peek(), &sealed) {
            Ok(plaintext) => plaintext,
            Err(error) => return SwitchOutcome::Error(error),
        };
        let decrypted: DecryptedReturn = match serde_json::from_slice(&plaintext) {
            Ok(decrypted) => decrypted,
            Err(error) => {
                return SwitchOutcome::Error(
                    report!(error).change_context(SwitchError::DecodingFailed),
                )
            }
        };

        Self::classify_decrypted(decrypted)
    }

    fn classify_decrypted(decrypted: DecryptedReturn) -> SwitchOutcome {
        if let Some(message) = decrypted.error.filter(|message| !message.is_empty()) {
            return SwitchOutcome::Error(report!(SwitchError::ExternalActorError { message }));
        }
        if let Some(code) = decrypted.authorization_code {
            return SwitchOutcome::Success {
                response_type: ResponseType::AuthorizationCode,
                payload: code,
                identity: decrypted.email,
            };
        }
        if let Some(web_url) = decrypted.web_url {
            return SwitchOutcome::Success {
                response_type: ResponseType::WebUrl,
                payload: web_url,
                identity: decrypted.email,
            };
        }
        // Nothing usable came back.
        SwitchOutcome::Cancel
    }

    fn reconcile_wallet(
        &self,
        flow_key: &str,
        bundle: WalletReturnBundle,
        state: Option<CorrelationState>,
    ) -> SwitchOutcome {
        let Some(state) = state else {
            logger::warn!(flow_key, "Wallet return with no persisted correlation state");
            return SwitchOutcome::Error(report!(SwitchError::CorrelationMismatch));
        };

        if bundle.app_guid != state.install_guid {
            return SwitchOutcome::Error(report!(SwitchError::CorrelationMismatch));
        }

        if let Some(message) = bundle.error.filter(|message| !message.is_empty()) {
            return SwitchOutcome::Error(report!(SwitchError::ExternalActorError { message }));
        }

        if bundle.response_type.as_deref() == Some("cancel") {
            return SwitchOutcome::Cancel;
        }
        if let Some(code) = bundle.authorization_code {
            return SwitchOutcome::Success {
                response_type: ResponseType::AuthorizationCode,
                payload: code.expose(),
                identity: bundle.email,
            };
        }
        if let Some(web_url) = bundle.web_url {
            return SwitchOutcome::Success {
                response_type: ResponseType::WebUrl,
                payload: web_url,
                identity: bundle.email,
            };
        }
        // The wallet answered without any usable data.
        SwitchOutcome::Cancel
    }
}

/// Compare the returned path against the success target's path.
fn returns_to_success_path(returned_url: &url::Url, success_url: &str) -> bool {
    match url::Url::parse(success_url) {
        Ok(success) => returned_url.path() == success.path(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use masking::{Secret, StrongSecret};

    use super::*;
    use crate::{crypto, encoder::RequestEncoder, storage::InMemoryCorrelationStore};

    const SUCCESS_URL: &str = "myapp://switch/success";

    async fn store_with(flow_key: &str, state: CorrelationState) -> Arc<InMemoryCorrelationStore> {
        let store = Arc::new(InMemoryCorrelationStore::new());
        store.persist(flow_key, state).await.unwrap();
        store
    }

    fn plain_state(token: &str) -> CorrelationState {
        CorrelationState {
            token: Secret::new(token.to_string()),
            symmetric_key: None,
            install_guid: "install-1".to_string(),
        }
    }

    #[tokio::test]
    async fn plain_round_trip_with_matching_token_succeeds() {
        let store = store_with("flow-1", plain_state("abc123")).await;
        let reconciler = ResponseReconciler::new(store);

        let return_url = "myapp://switch/success?token=abc123".to_string();
        let outcome = reconciler
            .reconcile("flow-1", SwitchReturn::DeepLink(return_url.clone()), SUCCESS_URL)
            .await;

        match outcome {
            SwitchOutcome::Success {
                response_type,
                payload,
                identity,
            } => {
                assert_eq!(response_type, ResponseType::ReturnUrl);
                assert_eq!(payload, return_url);
                assert!(identity.is_none());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_return_with_wrong_token_is_a_correlation_mismatch() {
        let store = store_with("flow-1", plain_state("abc123")).await;
        let reconciler = ResponseReconciler::new(store);

        let outcome = reconciler
            .reconcile(
                "flow-1",
                SwitchReturn::DeepLink("myapp://switch/success?token=zzz999".to_string()),
                SUCCESS_URL,
            )
            .await;

        match outcome {
            SwitchOutcome::Error(report) => {
                assert_eq!(report.current_context(), &SwitchError::CorrelationMismatch)
            }
            other => panic!("expected correlation mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_path_wins_regardless_of_query_parameters() {
        let store = store_with("flow-1", plain_state("abc123")).await;
        let reconciler = ResponseReconciler::new(store.clone());

        let outcome = reconciler
            .reconcile(
                "flow-1",
                SwitchReturn::DeepLink("myapp://switch/cancel?token=abc123".to_string()),
                SUCCESS_URL,
            )
            .await;

        assert!(matches!(outcome, SwitchOutcome::Cancel));
        // State was still cleared.
        assert!(store.consume("flow-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn return_without_persisted_state_fails_closed() {
        let reconciler = ResponseReconciler::new(Arc::new(InMemoryCorrelationStore::new()));

        let outcome = reconciler
            .reconcile(
                "flow-1",
                SwitchReturn::DeepLink("myapp://switch/success?token=abc123".to_string()),
                SUCCESS_URL,
            )
            .await;

        match outcome {
            SwitchOutcome::Error(report) => {
                assert_eq!(report.current_context(), &SwitchError::CorrelationMismatch)
            }
            other => panic!("expected correlation mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn state_is_consumed_exactly_once_per_attempt() {
        let store = store_with("flow-1", plain_state("abc123")).await;
        let reconciler = ResponseReconciler::new(store);

        let first = reconciler
            .reconcile(
                "flow-1",
                SwitchReturn::DeepLink("myapp://switch/success?token=abc123".to_string()),
                SUCCESS_URL,
            )
            .await;
        assert!(first.is_success());

        // Replaying the identical deep link finds no state.
        let replay = reconciler
            .reconcile(
                "flow-1",
                SwitchReturn::DeepLink("myapp://switch/success?token=abc123".to_string()),
                SUCCESS_URL,
            )
            .await;
        match replay {
            SwitchOutcome::Error(report) => {
                assert_eq!(report.current_context(), &SwitchError::CorrelationMismatch)
            }
            other => panic!("expected correlation mismatch on replay, got {other:?}"),
        }
    }

    fn encrypted_state(msg_guid: &str, key: &[u8]) -> CorrelationState {
        CorrelationState {
            token: Secret::new(msg_guid.to_string()),
            symmetric_key: Some(StrongSecret::new(key.to_vec())),
            install_guid: "install-1".to_string(),
        }
    }

    fn encrypted_return_url(msg_guid: &str, key: &[u8], response: serde_json::Value) -> String {
        let sealed =
            RequestEncoder::seal_return_payload(key, response.to_string().as_bytes()).unwrap();
        let carrier = serde_json::json!({ "msg_guid": msg_guid, "response": sealed });
        format!(
            "myapp://switch/success?payload={}",
            consts::BASE64_ENGINE.encode(carrier.to_string())
        )
    }

    #[tokio::test]
    async fn encrypted_round_trip_decrypts_and_classifies() {
        let key = crypto::generate_aes256_key().unwrap();
        let store = store_with("flow-1", encrypted_state("guid-1", &key)).await;
        let reconciler = ResponseReconciler::new(store);

        let return_url = encrypted_return_url(
            "guid-1",
            &key,
            serde_json::json!({
                "authorization_code": "code-4f1c",
                "email": "payer@example.com",
            }),
        );
        let outcome = reconciler
            .reconcile("flow-1", SwitchReturn::DeepLink(return_url), SUCCESS_URL)
            .await;

        match outcome {
            SwitchOutcome::Success {
                response_type,
                payload,
                identity,
            } => {
                assert_eq!(response_type, ResponseType::AuthorizationCode);
                assert_eq!(payload, "code-4f1c");
                assert_eq!(identity.as_deref(), Some("payer@example.com"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn guid_mismatch_gates_decryption() {
        let key = crypto::generate_aes256_key().unwrap();
        // The ciphertext is valid under a different key; if the GUID gate
        // failed, decryption would at best produce garbage. The gate must
        // answer first.
        let other_key = crypto::generate_aes256_key().unwrap();
        let store = store_with("flow-1", encrypted_state("guid-1", &key)).await;
        let reconciler = ResponseReconciler::new(store);

        let return_url = encrypted_return_url(
            "guid-other",
            &other_key,
            serde_json::json!({ "authorization_code": "forged" }),
        );
        let outcome = reconciler
            .reconcile("flow-1", SwitchReturn::DeepLink(return_url), SUCCESS_URL)
            .await;

        match outcome {
            SwitchOutcome::Error(report) => {
                assert_eq!(report.current_context(), &SwitchError::CorrelationMismatch)
            }
            other => panic!("expected correlation mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn embedded_error_field_surfaces_the_actor_message() {
        let key = crypto::generate_aes256_key().unwrap();
        let store = store_with("flow-1", encrypted_state("guid-1", &key)).await;
        let reconciler = ResponseReconciler::new(store);

        let return_url = encrypted_return_url(
            "guid-1",
            &key,
            serde_json::json!({ "error": "account unavailable" }),
        );
        let outcome = reconciler
            .reconcile("flow-1", SwitchReturn::DeepLink(return_url), SUCCESS_URL)
            .await;

        match outcome {
            SwitchOutcome::Error(report) => assert_eq!(
                report.current_context(),
                &SwitchError::ExternalActorError {
                    message: "account unavailable".to_string()
                }
            ),
            other => panic!("expected external actor error, got {other:?}"),
        }
    }

    fn wallet_bundle(app_guid: &str) -> WalletReturnBundle {
        WalletReturnBundle {
            app_guid: app_guid.to_string(),
            client_metadata_id: None,
            client_id: Some("client-1".to_string()),
            app_name: Some("Demo Shop".to_string()),
            environment: Some("sandbox".to_string()),
            environment_url: None,
            response_type: Some("code".to_string()),
            scope: None,
            web_url: None,
            authorization_code: Some(Secret::new("code-4f1c".to_string())),
            email: Some("payer@example.com".to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn wallet_bundle_with_matching_guid_succeeds() {
        let key = crypto::generate_aes256_key().unwrap();
        let store = store_with("flow-1", encrypted_state("guid-1", &key)).await;
        let reconciler = ResponseReconciler::new(store);

        let outcome = reconciler
            .reconcile(
                "flow-1",
                SwitchReturn::WalletExtras(wallet_bundle("install-1")),
                SUCCESS_URL,
            )
            .await;

        match outcome {
            SwitchOutcome::Success {
                response_type,
                payload,
                ..
            } => {
                assert_eq!(response_type, ResponseType::AuthorizationCode);
                assert_eq!(payload, "code-4f1c");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wallet_bundle_with_foreign_guid_is_rejected() {
        let key = crypto::generate_aes256_key().unwrap();
        let store = store_with("flow-1", encrypted_state("guid-1", &key)).await;
        let reconciler = ResponseReconciler::new(store);

        let outcome = reconciler
            .reconcile(
                "flow-1",
                SwitchReturn::WalletExtras(wallet_bundle("someone-else")),
                SUCCESS_URL,
            )
            .await;

        match outcome {
            SwitchOutcome::Error(report) => {
                assert_eq!(report.current_context(), &SwitchError::CorrelationMismatch)
            }
            other => panic!("expected correlation mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wallet_cancel_response_type_is_cancel() {
        let key = crypto::generate_aes256_key().unwrap();
        let store = store_with("flow-1", encrypted_state("guid-1", &key)).await;
        let reconciler = ResponseReconciler::new(store);

        let mut bundle = wallet_bundle("install-1");
        bundle.response_type = Some("cancel".to_string());
        bundle.authorization_code = None;

        let outcome = reconciler
            .reconcile("flow-1", SwitchReturn::WalletExtras(bundle), SUCCESS_URL)
            .await;
        assert!(matches!(outcome, SwitchOutcome::Cancel));
    }
}
