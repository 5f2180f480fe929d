//! Gateway API calls that bracket the switch.
//!
//! Two server round trips belong to every handshake: creating the
//! authorization context before control is handed away, and exchanging the
//! returned authorization code afterwards. Both go through the retrying
//! client; both bodies are secret-wrapped until sent.

use error_stack::ResultExt;
use masking::{PeekInterface, Secret, StrongSecret};
use switch_env::logger;

use crate::{
    client::{RetryPolicy, RetryingRequestClient},
    errors::{CustomResult, SwitchError},
    request::{Method, RequestBuilder},
    types::{AuthorizationRequest, GatewayResponse},
};

/// Server-side context backing one handshake attempt.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct AuthorizationContext {
    /// URL the external actor opens to collect approval.
    pub approval_url: String,
    /// Opaque context identifier, echoed on the exchange call.
    pub context_id: String,
}

/// Result of trading an authorization code for a usable token.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct ExchangedToken {
    pub access_token: Secret<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct CreateContextBody<'a> {
    client_id: &'a str,
    environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scopes: Option<Vec<&'a str>>,
    return_url: &'a str,
    cancel_url: &'a str,
    /// Caller-supplied attributes, forwarded verbatim as top-level fields.
    #[serde(flatten)]
    additional_params: std::collections::BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, serde::Serialize)]
struct ExchangeBody<'a> {
    client_id: &'a str,
    context_id: &'a str,
    authorization_code: &'a str,
}

/// The gateway as the handshake sees it.
pub struct GatewayApi {
    client: std::sync::Arc<RetryingRequestClient>,
    base_url: String,
    client_id: String,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for GatewayApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayApi")
            .field("base_url", &self.base_url)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl GatewayApi {
    pub fn new(
        client: std::sync::Arc<RetryingRequestClient>,
        base_url: String,
        client_id: String,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url,
            client_id,
            retry_policy,
        }
    }

    /// First round trip: ask the gateway to open an authorization context
    /// for this request.
    pub async fn create_authorization_context(
        &self,
        request: &AuthorizationRequest,
    ) -> CustomResult<AuthorizationContext, SwitchError> {
        let body = CreateContextBody {
            client_id: &request.client_id,
            environment: request.environment.to_string(),
            scopes: request.scopes.as_ref().map(|scopes| {
                let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted
            }),
            return_url: &request.success_url,
            cancel_url: &request.cancel_url,
            additional_params: request
                .additional_params
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect(),
        };
        let response = self.post("/v1/authorization-contexts", &body).await?;
        logger::debug!(status = response.status_code, "Authorization context created");
        parse_body(&response)
    }

    /// Second round trip: trade the authorization code the external actor
    /// handed back for the final token.
    pub async fn exchange_authorization_code(
        &self,
        context_id: &str,
        authorization_code: &Secret<String>,
    ) -> CustomResult<ExchangedToken, SwitchError> {
        let body = ExchangeBody {
            client_id: &self.client_id,
            context_id,
            authorization_code: authorization_code.peek(),
        };
        let response = self.post("/v1/authorization-codes/exchange", &body).await?;
        logger::debug!(status = response.status_code, "Authorization code exchanged");
        parse_body(&response)
    }

    async fn post<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> CustomResult<GatewayResponse, SwitchError> {
        let raw = serde_json::to_string(body).change_context(SwitchError::EncodingFailed)?;
        let request = RequestBuilder::new()
            .url(&format!("{}{path}", self.base_url.trim_end_matches('/')))
            .method(Method::Post)
            .attach_default_headers()
            .content_type(mime::APPLICATION_JSON)
            .set_body(StrongSecret::new(raw))
            .build();
        self.client.send(request, self.retry_policy).await
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(
    response: &GatewayResponse,
) -> CustomResult<T, SwitchError> {
    serde_json::from_slice(&response.body)
        .change_context(SwitchError::ResponseDeserializationFailed)
        .attach_printable("Gateway returned an unexpected body shape")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::{Arc, Mutex};

    use switch_env::Env;

    use super::*;
    use crate::{client::HttpDispatch, request::Request};

    struct RecordingDispatch {
        responses: Mutex<Vec<GatewayResponse>>,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait::async_trait]
    impl HttpDispatch for RecordingDispatch {
        async fn dispatch(&self, request: &Request) -> CustomResult<GatewayResponse, SwitchError> {
            self.seen.lock().unwrap().push((
                request.url.clone(),
                request.body.as_ref().map(|body| body.peek().clone()),
            ));
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    fn api(responses: Vec<GatewayResponse>) -> (GatewayApi, Arc<RecordingDispatch>) {
        let dispatch = Arc::new(RecordingDispatch {
            responses: Mutex::new(responses),
            seen: Mutex::new(Vec::new()),
        });
        let client = Arc::new(RetryingRequestClient::new(dispatch.clone()));
        (
            GatewayApi::new(
                client,
                "https://api.gateway.test".to_string(),
                "client-1".to_string(),
                RetryPolicy::NoRetry,
            ),
            dispatch,
        )
    }

    fn ok_response(body: serde_json::Value) -> GatewayResponse {
        GatewayResponse {
            status_code: 200,
            headers: None,
            body: bytes::Bytes::from(body.to_string()),
        }
    }

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            environment: Env::Sandbox,
            client_id: "client-1".to_string(),
            correlation_token: Secret::new("abc123".to_string()),
            scopes: None,
            success_url: "myapp://switch/success".to_string(),
            cancel_url: "myapp://switch/cancel".to_string(),
            additional_params: Vec::new(),
            symmetric_key: None,
        }
    }

    #[tokio::test]
    async fn create_context_posts_to_the_context_route() {
        let (api, dispatch) = api(vec![ok_response(serde_json::json!({
            "approval_url": "https://gateway.test/approve?ctx=42",
            "context_id": "ctx-42",
        }))]);

        let context = api.create_authorization_context(&request()).await.unwrap();
        assert_eq!(context.context_id, "ctx-42");

        let seen = dispatch.seen.lock().unwrap();
        assert_eq!(
            seen[0].0,
            "https://api.gateway.test/v1/authorization-contexts"
        );
        let body: serde_json::Value =
            serde_json::from_str(seen[0].1.as_deref().unwrap()).unwrap();
        assert_eq!(body["client_id"], "client-1");
        assert_eq!(body["return_url"], "myapp://switch/success");
    }

    #[tokio::test]
    async fn create_context_forwards_additional_params() {
        let (api, dispatch) = api(vec![ok_response(serde_json::json!({
            "approval_url": "https://gateway.test/approve?ctx=42",
            "context_id": "ctx-42",
        }))]);

        let mut request = request();
        request.additional_params = vec![
            ("merchant_ref".to_string(), "order-77".to_string()),
            ("channel".to_string(), "in_app".to_string()),
        ];
        api.create_authorization_context(&request).await.unwrap();

        let seen = dispatch.seen.lock().unwrap();
        let body: serde_json::Value =
            serde_json::from_str(seen[0].1.as_deref().unwrap()).unwrap();
        assert_eq!(body["merchant_ref"], "order-77");
        assert_eq!(body["channel"], "in_app");
    }

    #[tokio::test]
    async fn exchange_returns_the_token_and_identity() {
        let (api, _dispatch) = api(vec![ok_response(serde_json::json!({
            "access_token": "tok-99",
            "email": "payer@example.com",
        }))]);

        let exchanged = api
            .exchange_authorization_code("ctx-42", &Secret::new("code-4f1c".to_string()))
            .await
            .unwrap();
        assert_eq!(exchanged.access_token.peek(), "tok-99");
        assert_eq!(exchanged.email.as_deref(), Some("payer@example.com"));
    }

    #[tokio::test]
    async fn malformed_gateway_body_is_a_deserialization_error() {
        let (api, _dispatch) = api(vec![GatewayResponse {
            status_code: 200,
            headers: None,
            body: bytes::Bytes::from_static(b"not json"),
        }]);

        let error = api
            .create_authorization_context(&request())
            .await
            .unwrap_err();
        assert_eq!(
            error.current_context(),
            &SwitchError::ResponseDeserializationFailed
        );
    }
}
