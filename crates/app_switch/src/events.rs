//! Handshake lifecycle events.
//!
//! The SDK reports what happened; what the embedding application does with
//! it (analytics, tracing, nothing) is its own business, behind [`EventSink`].

use switch_env::logger;

use crate::{recipe::RecipeKind, types::ResponseType};

/// Milestones of one handshake attempt, in the order they can occur.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(tag = "event", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SwitchEvent {
    /// An eligible execution target was picked.
    TargetSelected { kind: RecipeKind },
    /// The external actor asked for an additional user challenge.
    ChallengeRequired,
    /// Terminal: the handshake produced a usable result.
    Succeeded { response_type: ResponseType },
    /// Terminal: the handshake failed. Carries the error's display form,
    /// never its payload.
    Failed { reason: String },
    /// Terminal: the user backed out.
    Canceled,
}

/// Receiver for lifecycle events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn record(&self, flow_key: &str, event: SwitchEvent);
}

/// Default sink: structured log lines, nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggerSink;

impl EventSink for LoggerSink {
    fn record(&self, flow_key: &str, event: SwitchEvent) {
        logger::info!(flow_key, event = %event, "Handshake event");
    }
}
