//! Outbound half of the switch payload state machine.
//!
//! Builds the URL (or wallet handoff parameters) the external actor
//! receives, and persists the correlation state the reconciler will need
//! when control comes back. Persisting happens last, immediately before the
//! caller transfers control away.

use base64::Engine;
use error_stack::ResultExt;
use masking::{PeekInterface, StrongSecret};
use switch_env::logger;

use crate::{
    consts,
    crypto::{self, EncodeMessage, GcmAes256, RsaOaep},
    errors::{CustomResult, SwitchError},
    storage::CorrelationStore,
    types::{AuthorizationRequest, CorrelationState},
};

/// Cleartext envelope, RSA-encrypted under the switch target's public key.
/// Carries the shared secret the return payload will be encrypted with.
#[derive(Debug, serde::Serialize)]
struct SwitchEnvelope<'a> {
    msg_guid: &'a str,
    symmetric_key: String,
    device: &'a str,
    timestamp: i64,
}

/// Base64-encoded (not encrypted) companion payload describing the request.
#[derive(Debug, serde::Serialize)]
struct SwitchPayload<'a> {
    client_id: &'a str,
    app_name: &'a str,
    environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scopes: Option<Vec<String>>,
    timestamp: i64,
}

/// Builds outbound switch payloads and persists their correlation state.
pub struct RequestEncoder {
    store: std::sync::Arc<dyn CorrelationStore>,
    install_guid: String,
    app_name: String,
    device_descriptor: String,
}

impl std::fmt::Debug for RequestEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEncoder")
            .field("install_guid", &self.install_guid)
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

impl RequestEncoder {
    pub fn new(
        store: std::sync::Arc<dyn CorrelationStore>,
        install_guid: String,
        app_name: String,
        device_descriptor: String,
    ) -> Self {
        Self {
            store,
            install_guid,
            app_name,
            device_descriptor,
        }
    }

    /// Plain variant: the approval URL with the correlation token appended
    /// as a query parameter. Used for simple checkout and mandate
    /// redirects.
    pub async fn encode_plain(
        &self,
        flow_key: &str,
        approval_url: &str,
        request: &AuthorizationRequest,
    ) -> CustomResult<url::Url, SwitchError> {
        let mut switch_url =
            url::Url::parse(approval_url).change_context(SwitchError::UrlParsingFailed)?;
        switch_url
            .query_pairs_mut()
            .append_pair(consts::CORRELATION_TOKEN_PARAM, request.correlation_token.peek());

        self.store
            .persist(
                flow_key,
                CorrelationState {
                    token: request.correlation_token.clone(),
                    symmetric_key: None,
                    install_guid: self.install_guid.clone(),
                },
            )
            .await?;

        logger::debug!(flow_key, "Plain switch payload ready");
        Ok(switch_url)
    }

    /// Encrypted variant, for higher-sensitivity authorization requests.
    ///
    /// Generates a random envelope GUID and (unless the request already
    /// carries one) a random symmetric key; the envelope travels RSA-encrypted
    /// as `payloadEnc`, the request description travels base64-encoded as
    /// `payload`, and both the GUID and the symmetric key are persisted for
    /// the return leg.
    pub async fn encode_encrypted(
        &self,
        flow_key: &str,
        endpoint: &str,
        request: &AuthorizationRequest,
        target_public_key_pem: &[u8],
    ) -> CustomResult<url::Url, SwitchError> {
        let msg_guid = uuid::Uuid::new_v4().to_string();
        let symmetric_key: StrongSecret<Vec<u8>> = match &request.symmetric_key {
            Some(key) => key.clone(),
            None => StrongSecret::new(crypto::generate_aes256_key()?.to_vec()),
        };
        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();

        let envelope = SwitchEnvelope {
            msg_guid: &msg_guid,
            symmetric_key: consts::BASE64_ENGINE.encode(symmetric_key.peek()),
            device: &self.device_descriptor,
            timestamp,
        };
        let envelope_raw =
            serde_json::to_vec(&envelope).change_context(SwitchError::EncodingFailed)?;
        let envelope_enc = RsaOaep.encrypt(target_public_key_pem, &envelope_raw)?;

        let payload = SwitchPayload {
            client_id: &request.client_id,
            app_name: &self.app_name,
            environment: request.environment.to_string(),
            scopes: request.scopes.as_ref().map(|scopes| {
                let mut sorted: Vec<String> = scopes.iter().cloned().collect();
                sorted.sort();
                sorted
            }),
            timestamp,
        };
        let payload_raw =
            serde_json::to_vec(&payload).change_context(SwitchError::EncodingFailed)?;

        let mut switch_url =
            url::Url::parse(endpoint).change_context(SwitchError::UrlParsingFailed)?;
        switch_url
            .query_pairs_mut()
            .append_pair(
                consts::PAYLOAD_PARAM,
                &consts::BASE64_ENGINE.encode(&payload_raw),
            )
            .append_pair(
                consts::PAYLOAD_ENC_PARAM,
                &consts::BASE64_ENGINE.encode(&envelope_enc),
            )
            .append_pair(consts::SOURCE_PARAM, &request.client_id)
            .append_pair(consts::SUCCESS_URL_PARAM, &request.success_url)
            .append_pair(consts::CANCEL_URL_PARAM, &request.cancel_url);

        self.store
            .persist(
                flow_key,
                CorrelationState {
                    token: masking::Secret::new(msg_guid),
                    symmetric_key: Some(symmetric_key),
                    install_guid: self.install_guid.clone(),
                },
            )
            .await?;

        logger::debug!(flow_key, "Encrypted switch payload ready");
        Ok(switch_url)
    }

    /// Seal a message under the same construction the external actor uses
    /// for its return payload. Lives here so both halves of the state
    /// machine share one definition of the symmetric format.
    pub fn seal_return_payload(
        symmetric_key: &[u8],
        message: &[u8],
    ) -> CustomResult<String, SwitchError> {
        let sealed = GcmAes256.encode_message(symmetric_key, message)?;
        Ok(consts::BASE64_ENGINE.encode(sealed))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{collections::HashMap, sync::Arc};

    use masking::Secret;
    use switch_env::Env;

    use super::*;
    use crate::storage::InMemoryCorrelationStore;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            environment: Env::Sandbox,
            client_id: "client-1".to_string(),
            correlation_token: Secret::new("abc123".to_string()),
            scopes: Some(std::collections::HashSet::from(["payments".to_string()])),
            success_url: "myapp://switch/success".to_string(),
            cancel_url: "myapp://switch/cancel".to_string(),
            additional_params: Vec::new(),
            symmetric_key: None,
        }
    }

    fn encoder(store: Arc<InMemoryCorrelationStore>) -> RequestEncoder {
        RequestEncoder::new(
            store,
            "install-1".to_string(),
            "Demo Shop".to_string(),
            "test-device".to_string(),
        )
    }

    #[tokio::test]
    async fn plain_variant_appends_token_and_persists_state() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        let encoder = encoder(store.clone());

        let switch_url = encoder
            .encode_plain("flow-1", "https://gateway.test/approve?ctx=42", &request())
            .await
            .unwrap();

        let query: HashMap<String, String> = switch_url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query.get("token").map(String::as_str), Some("abc123"));
        // Pre-existing parameters stay intact.
        assert_eq!(query.get("ctx").map(String::as_str), Some("42"));

        let state = store.consume("flow-1").await.unwrap().unwrap();
        assert_eq!(state.token.peek(), "abc123");
        assert!(state.symmetric_key.is_none());
    }

    #[tokio::test]
    async fn encrypted_variant_carries_both_payloads_and_persists_the_key() {
        let keypair = openssl::rsa::Rsa::generate(2048).unwrap();
        let public_pem = keypair.public_key_to_pem().unwrap();

        let store = Arc::new(InMemoryCorrelationStore::new());
        let encoder = encoder(store.clone());

        let switch_url = encoder
            .encode_encrypted("flow-1", "https://gateway.test/switch", &request(), &public_pem)
            .await
            .unwrap();

        let query: HashMap<String, String> = switch_url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query.get("x-source").map(String::as_str), Some("client-1"));
        assert_eq!(
            query.get("x-success").map(String::as_str),
            Some("myapp://switch/success")
        );
        assert_eq!(
            query.get("x-cancel").map(String::as_str),
            Some("myapp://switch/cancel")
        );

        // The cleartext payload is encoded, not encrypted.
        let payload_raw = consts::BASE64_ENGINE
            .decode(query.get("payload").unwrap())
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&payload_raw).unwrap();
        assert_eq!(payload["client_id"], "client-1");
        assert_eq!(payload["scopes"][0], "payments");

        // The envelope opens only with the target's private key, and its
        // symmetric key matches what was persisted.
        let envelope_enc = consts::BASE64_ENGINE
            .decode(query.get("payloadEnc").unwrap())
            .unwrap();
        let mut opened = vec![0; keypair.size() as usize];
        let written = keypair
            .private_decrypt(&envelope_enc, &mut opened, openssl::rsa::Padding::PKCS1_OAEP)
            .unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&opened[..written]).unwrap();

        let state = store.consume("flow-1").await.unwrap().unwrap();
        assert_eq!(envelope["msg_guid"], state.token.peek().as_str());
        assert_eq!(
            envelope["symmetric_key"],
            consts::BASE64_ENGINE
                .encode(state.symmetric_key.unwrap().peek())
                .as_str()
        );
    }
}
