//! Switch targets and their selection.
//!
//! Recipes are configuration: a priority-ordered set of candidate execution
//! targets, refreshed out-of-band. Eligibility depends on what is actually
//! on the device, which only the host platform can answer; that answer comes
//! through [`DeviceInspector`].

use serde::{Deserialize, Serialize};
use switch_env::logger;

use crate::consts;

/// Kind of execution target a recipe points at.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecipeKind {
    /// An installed wallet application.
    Wallet,
    /// The system browser.
    Browser,
}

/// One candidate execution target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recipe {
    /// Wallet or browser.
    pub kind: RecipeKind,
    /// Protocol version the target speaks.
    pub protocol_version: u8,
    /// Lower is tried first.
    pub priority: u8,
    /// Package of the wallet application. Required for wallet recipes.
    #[serde(default)]
    pub wallet_package: Option<String>,
    /// Expected certificate digest of the wallet package (see
    /// [`crate::crypto::certificate_digest`]). Checked when security
    /// checking is enabled; a mismatch disqualifies the recipe even if the
    /// package is installed.
    #[serde(default)]
    pub pinned_signature: Option<String>,
}

/// Host platform probe. The SDK never inspects packages or resolves URLs
/// itself; the embedding application answers these.
pub trait DeviceInspector: Send + Sync {
    /// Whether `package` is installed on the device.
    fn is_package_installed(&self, package: &str) -> bool;

    /// Certificate digest of the installed `package`, or `None` when not
    /// installed or unreadable.
    fn package_signature(&self, package: &str) -> Option<String>;

    /// Whether the given browser package can open `url`.
    fn can_open_url(&self, browser_package: &str, url: &url::Url) -> bool;
}

/// Picks the first eligible recipe in ascending priority order.
#[derive(Clone, Copy, Debug)]
pub struct TargetSelector {
    security_check_enabled: bool,
}

impl TargetSelector {
    pub fn new(security_check_enabled: bool) -> Self {
        Self {
            security_check_enabled,
        }
    }

    /// Evaluate `recipes` against the device and return the first eligible
    /// one. `None` means the handshake is not possible on this device — a
    /// capability result, not an error.
    pub fn select<'a>(
        &self,
        recipes: &'a [Recipe],
        inspector: &dyn DeviceInspector,
        switch_url: &url::Url,
    ) -> Option<&'a Recipe> {
        let mut ordered: Vec<&Recipe> = recipes.iter().collect();
        ordered.sort_by_key(|recipe| recipe.priority);

        let selected = ordered
            .into_iter()
            .find(|recipe| self.is_eligible(recipe, inspector, switch_url));
        match selected {
            Some(recipe) => {
                logger::info!(kind = %recipe.kind, priority = recipe.priority, "Switch target selected")
            }
            None => logger::info!("No eligible switch target on this device"),
        }
        selected
    }

    fn is_eligible(
        &self,
        recipe: &Recipe,
        inspector: &dyn DeviceInspector,
        switch_url: &url::Url,
    ) -> bool {
        match recipe.kind {
            RecipeKind::Wallet => self.wallet_eligible(recipe, inspector),
            RecipeKind::Browser => Self::browser_eligible(inspector, switch_url),
        }
    }

    fn wallet_eligible(&self, recipe: &Recipe, inspector: &dyn DeviceInspector) -> bool {
        let Some(package) = recipe.wallet_package.as_deref() else {
            logger::warn!(priority = recipe.priority, "Wallet recipe without a package");
            return false;
        };
        if !inspector.is_package_installed(package) {
            return false;
        }
        if !self.security_check_enabled {
            return true;
        }
        match (&recipe.pinned_signature, inspector.package_signature(package)) {
            (Some(pinned), Some(actual)) => {
                let matches = pinned == &actual;
                if !matches {
                    logger::warn!(package, "Wallet signature does not match the pinned value");
                }
                matches
            }
            // Security checking without a verifiable signature fails closed.
            _ => false,
        }
    }

    fn browser_eligible(inspector: &dyn DeviceInspector, switch_url: &url::Url) -> bool {
        consts::KNOWN_BROWSER_PACKAGES.iter().any(|browser| {
            inspector.is_package_installed(browser) && inspector.can_open_url(browser, switch_url)
        })
    }
}
