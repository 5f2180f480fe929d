//! Handshake orchestration.
//!
//! Ties the pieces together: gateway calls bracket the switch, the selector
//! picks where control goes, the encoder persists what the reconciler will
//! verify, and the terminal outcome is delivered exactly once through the
//! scheduler's completion lane.

use std::sync::Arc;

use error_stack::{report, ResultExt};
use futures::FutureExt;
use masking::{ExposeInterface, Secret};
use switch_env::logger;

use crate::{
    client::{HttpDispatch, RetryPolicy, RetryingRequestClient},
    configs::{ConfigurationLoader, Settings},
    encoder::RequestEncoder,
    errors::{CustomResult, SwitchError},
    events::{EventSink, SwitchEvent},
    gateway::GatewayApi,
    recipe::{DeviceInspector, RecipeKind, TargetSelector},
    reconciler::ResponseReconciler,
    scheduler::Scheduler,
    storage::CorrelationStore,
    types::{AuthorizationRequest, ResponseType, SwitchOutcome, SwitchReturn},
};

/// How the host must hand control away.
#[derive(Clone, Debug)]
pub enum SwitchInstruction {
    /// Open this URL in the selected browser.
    OpenUrl(url::Url),
    /// Launch the wallet application with the switch URL as its payload.
    WalletHandoff {
        package: String,
        switch_url: url::Url,
    },
}

/// A handshake attempt waiting for the external actor to return.
#[derive(Clone, Debug)]
pub struct PendingSwitch {
    /// Key the return must be completed under.
    pub flow_key: String,
    pub instruction: SwitchInstruction,
}

/// Receives the one terminal outcome of an attempt. Called on the
/// completion lane; implementations must not block.
pub trait OutcomeListener: Send + Sync {
    fn on_outcome(&self, flow_key: &str, outcome: SwitchOutcome);
}

/// Everything a handshake needs, constructed explicitly by the host. No
/// global state; two contexts never share counters or correlation entries
/// unless given the same store.
pub struct HandshakeContext {
    settings: Settings,
    gateway: GatewayApi,
    encoder: RequestEncoder,
    reconciler: ResponseReconciler,
    selector: TargetSelector,
    scheduler: Arc<dyn Scheduler>,
    inspector: Arc<dyn DeviceInspector>,
    events: Arc<dyn EventSink>,
    loader: Arc<dyn ConfigurationLoader>,
}

impl std::fmt::Debug for HandshakeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl HandshakeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        dispatch: Arc<dyn HttpDispatch>,
        store: Arc<dyn CorrelationStore>,
        scheduler: Arc<dyn Scheduler>,
        inspector: Arc<dyn DeviceInspector>,
        events: Arc<dyn EventSink>,
        loader: Arc<dyn ConfigurationLoader>,
        install_guid: String,
        device_descriptor: String,
    ) -> CustomResult<Self, SwitchError> {
        settings.validate()?;

        let client = Arc::new(RetryingRequestClient::new(dispatch));
        let gateway = GatewayApi::new(
            client,
            settings.gateway_base_url.clone(),
            settings.client_id.clone(),
            RetryPolicy::RetryUpTo(settings.retry_limit),
        );
        let encoder = RequestEncoder::new(
            store.clone(),
            install_guid,
            settings.app_name.clone(),
            device_descriptor,
        );
        let reconciler = ResponseReconciler::new(store);
        let selector = TargetSelector::new(settings.security_check_enabled);

        Ok(Self {
            settings,
            gateway,
            encoder,
            reconciler,
            selector,
            scheduler,
            inspector,
            events,
            loader,
        })
    }

    /// Prepare one attempt: open the server-side context, pick a target,
    /// encode and persist, and hand back what the host must launch.
    ///
    /// Nothing is persisted when this fails; there is no pending flow to
    /// clean up.
    pub async fn begin(
        &self,
        request: &AuthorizationRequest,
    ) -> CustomResult<PendingSwitch, SwitchError> {
        let config = self.loader.load().await?;
        let context = self.gateway.create_authorization_context(request).await?;
        let approval_url = url::Url::parse(&context.approval_url)
            .change_context(SwitchError::UrlParsingFailed)
            .attach_printable("Gateway returned an unparsable approval URL")?;

        let recipe = self
            .selector
            .select(&config.recipes, self.inspector.as_ref(), &approval_url)
            .ok_or_else(|| report!(SwitchError::NoEligibleTarget))?;
        self.events.record(
            &context.context_id,
            SwitchEvent::TargetSelected { kind: recipe.kind },
        );

        // The flow key is the gateway context id: it survives in the store
        // and is what the exchange call needs on the way back.
        let switch_url = match &config.target_public_key_pem {
            Some(pem) => {
                self.encoder
                    .encode_encrypted(
                        &context.context_id,
                        &context.approval_url,
                        request,
                        pem.as_bytes(),
                    )
                    .await?
            }
            None => {
                self.encoder
                    .encode_plain(&context.context_id, &context.approval_url, request)
                    .await?
            }
        };

        let instruction = match recipe.kind {
            RecipeKind::Wallet => {
                let package = recipe
                    .wallet_package
                    .clone()
                    .ok_or_else(|| report!(SwitchError::NoEligibleTarget))?;
                SwitchInstruction::WalletHandoff {
                    package,
                    switch_url,
                }
            }
            RecipeKind::Browser => SwitchInstruction::OpenUrl(switch_url),
        };

        logger::info!(flow_key = %context.context_id, "Handshake pending, handing control away");
        Ok(PendingSwitch {
            flow_key: context.context_id,
            instruction,
        })
    }

    /// Reconcile what came back and deliver the terminal outcome, exactly
    /// once, through the completion lane.
    pub async fn complete(
        &self,
        flow_key: &str,
        returned: SwitchReturn,
        listener: Arc<dyn OutcomeListener>,
    ) {
        let outcome = self
            .reconciler
            .reconcile(flow_key, returned, &self.settings.success_url)
            .await;
        let outcome = self.finalize(flow_key, outcome).await;
        self.record_terminal(flow_key, &outcome);

        let flow_key = flow_key.to_string();
        self.scheduler.run_on_completion(
            async move {
                listener.on_outcome(&flow_key, outcome);
            }
            .boxed(),
        );
    }

    /// Authorization codes are only half a result; trade them with the
    /// gateway before delivering. Other response types pass through.
    async fn finalize(&self, flow_key: &str, outcome: SwitchOutcome) -> SwitchOutcome {
        match outcome {
            SwitchOutcome::Success {
                response_type: ResponseType::AuthorizationCode,
                payload,
                identity,
            } => {
                let code = Secret::new(payload);
                match self
                    .gateway
                    .exchange_authorization_code(flow_key, &code)
                    .await
                {
                    Ok(exchanged) => SwitchOutcome::Success {
                        response_type: ResponseType::AuthorizationCode,
                        payload: exchanged.access_token.expose(),
                        identity: exchanged.email.or(identity),
                    },
                    Err(error) => SwitchOutcome::Error(error),
                }
            }
            other => other,
        }
    }

    fn record_terminal(&self, flow_key: &str, outcome: &SwitchOutcome) {
        match outcome {
            SwitchOutcome::Success { response_type, .. } => {
                if *response_type == ResponseType::WebUrl {
                    self.events
                        .record(flow_key, SwitchEvent::ChallengeRequired);
                }
                self.events.record(
                    flow_key,
                    SwitchEvent::Succeeded {
                        response_type: *response_type,
                    },
                );
            }
            SwitchOutcome::Cancel => self.events.record(flow_key, SwitchEvent::Canceled),
            SwitchOutcome::Error(report) => self.events.record(
                flow_key,
                SwitchEvent::Failed {
                    reason: report.current_context().to_string(),
                },
            ),
        }
    }
}
