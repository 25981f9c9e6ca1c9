//! Read-modify-write of the `orgMapping` key in Grafana's generic OAuth
//! provider settings.
//!
//! Every other key in the settings object is preserved untouched; only
//! `orgMapping` is ever rewritten.

use serde_json::Value;

use orgmapper_mapping::{encode, TenantMapping};

use crate::error::GrafanaError;

pub const SSO_PROVIDER: &str = "generic_oauth";
pub const ORG_MAPPING_KEY: &str = "orgMapping";

/// A provider's `settings` object, key order preserved.
pub type Settings = serde_json::Map<String, Value>;

/// The two calls this crate needs from Grafana.
pub trait SsoSettingsApi: Send + Sync {
    /// Current settings for `provider`; [`GrafanaError::NotFound`] when the
    /// provider was never configured.
    fn get_provider_settings(&self, provider: &str) -> Result<Settings, GrafanaError>;

    /// Replace the whole settings object for `provider`.
    fn update_provider_settings(
        &self,
        provider: &str,
        settings: &Settings,
    ) -> Result<(), GrafanaError>;
}

/// Current generic OAuth settings; an unconfigured provider reads as empty.
pub fn fetch_settings<A: SsoSettingsApi + ?Sized>(api: &A) -> Result<Settings, GrafanaError> {
    match api.get_provider_settings(SSO_PROVIDER) {
        Ok(settings) => Ok(settings),
        Err(err) if err.is_not_found() => {
            tracing::debug!("{SSO_PROVIDER} not configured yet, starting from empty settings");
            Ok(Settings::new())
        }
        Err(err) => Err(err),
    }
}

pub fn replace_settings<A: SsoSettingsApi + ?Sized>(
    api: &A,
    settings: &Settings,
) -> Result<(), GrafanaError> {
    api.update_provider_settings(SSO_PROVIDER, settings)
}

/// Encode `tenants` and write the result into `orgMapping`. Returns the
/// document that was written.
pub fn sync_org_mapping<A: SsoSettingsApi + ?Sized>(
    api: &A,
    tenants: &[TenantMapping],
) -> Result<String, GrafanaError> {
    let mut settings = fetch_settings(api)?;
    let document = encode(tenants);
    settings.insert(
        ORG_MAPPING_KEY.to_string(),
        Value::String(document.clone()),
    );
    replace_settings(api, &settings)?;
    tracing::info!(
        "synced {ORG_MAPPING_KEY} for {} tenant(s): {} byte(s)",
        tenants.len(),
        document.len()
    );
    Ok(document)
}

/// The `orgMapping` document as Grafana holds it now. `None` when the
/// provider is unconfigured; an absent or null key reads as `""`.
pub fn current_org_mapping<A: SsoSettingsApi + ?Sized>(
    api: &A,
) -> Result<Option<String>, GrafanaError> {
    let settings = match api.get_provider_settings(SSO_PROVIDER) {
        Ok(settings) => settings,
        Err(err) if err.is_not_found() => return Ok(None),
        Err(err) => return Err(err),
    };
    match settings.get(ORG_MAPPING_KEY) {
        None | Some(Value::Null) => Ok(Some(String::new())),
        Some(Value::String(document)) => Ok(Some(document.clone())),
        Some(other) => Err(GrafanaError::Decode(format!(
            "{ORG_MAPPING_KEY} is not a string: {other}"
        ))),
    }
}
