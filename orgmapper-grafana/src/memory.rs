//! In-process [`SsoSettingsApi`] that records every write.
//!
//! Backs dry runs and tests; failures can be injected per direction.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::error::GrafanaError;
use crate::sso::{Settings, SsoSettingsApi, ORG_MAPPING_KEY, SSO_PROVIDER};

#[derive(Debug, Default)]
struct State {
    providers: BTreeMap<String, Settings>,
    writes: Vec<(String, Settings)>,
    reads: usize,
    fail_reads: Option<String>,
    fail_writes: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemorySso {
    state: Mutex<State>,
}

impl MemorySso {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(provider: &str, settings: Settings) -> Self {
        let sso = Self::new();
        sso.lock().providers.insert(provider.to_string(), settings);
        sso
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn settings(&self, provider: &str) -> Option<Settings> {
        self.lock().providers.get(provider).cloned()
    }

    /// `orgMapping` of the generic OAuth provider, if it holds a string.
    pub fn org_mapping(&self) -> Option<String> {
        self.settings(SSO_PROVIDER)?
            .get(ORG_MAPPING_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Replace `orgMapping` out of band, as an operator editing Grafana would.
    pub fn set_org_mapping(&self, document: &str) {
        self.lock()
            .providers
            .entry(SSO_PROVIDER.to_string())
            .or_default()
            .insert(ORG_MAPPING_KEY.to_string(), Value::String(document.to_string()));
    }

    /// Forget the provider entirely so reads return not-found.
    pub fn clear(&self) {
        self.lock().providers.clear();
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// `orgMapping` values in write order.
    pub fn written_mappings(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .filter_map(|(_, settings)| settings.get(ORG_MAPPING_KEY))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    pub fn fail_reads(&self, message: &str) {
        self.lock().fail_reads = Some(message.to_string());
    }

    pub fn fail_writes(&self, message: &str) {
        self.lock().fail_writes = Some(message.to_string());
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.fail_reads = None;
        state.fail_writes = None;
    }
}

fn injected(message: &str) -> GrafanaError {
    GrafanaError::Api {
        status: 500,
        body: message.to_string(),
    }
}

impl SsoSettingsApi for MemorySso {
    fn get_provider_settings(&self, provider: &str) -> Result<Settings, GrafanaError> {
        let mut state = self.lock();
        state.reads += 1;
        if let Some(message) = &state.fail_reads {
            return Err(injected(message));
        }
        state
            .providers
            .get(provider)
            .cloned()
            .ok_or_else(|| GrafanaError::NotFound {
                provider: provider.to_string(),
            })
    }

    fn update_provider_settings(
        &self,
        provider: &str,
        settings: &Settings,
    ) -> Result<(), GrafanaError> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_writes {
            return Err(injected(message));
        }
        state
            .providers
            .insert(provider.to_string(), settings.clone());
        state.writes.push((provider.to_string(), settings.clone()));
        Ok(())
    }
}
