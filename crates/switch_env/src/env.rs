//!
//! Gateway environment the SDK is pointed at.
//!

use serde::{Deserialize, Serialize};

/// Which gateway environment a handshake runs against.
///
/// The environment is part of every authorization request and of the wallet
/// return bundle; a response for one environment must never be reconciled
/// against a request for another.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Env {
    /// Sandbox gateway, test credentials only.
    #[default]
    Sandbox,
    /// Production gateway.
    Production,
    /// Local mock gateway, used by tests and demos.
    Mock,
}

impl Env {
    /// Whether this environment handles live payment instruments.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}
