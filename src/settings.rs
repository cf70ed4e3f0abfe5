//! Injected ambient-settings capability.
//!
//! Proxy and TLS material comes from the embedding application's settings
//! store, not from process-wide globals; configuration assembly receives a
//! [`SettingsProvider`] plus a [`TemplateExpander`] applied to raw values
//! before use. This keeps the client testable with fake settings.

use std::collections::HashMap;

/// Keys understood by configuration assembly.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    /// Whether an explicit proxy should be used at all
    ProxyEnabled,
    /// Whether proxy discovery is left to the transport/OS
    ProxyAutodetect,
    ProxyHost,
    ProxyPort,
    ProxyUsername,
    ProxyPassword,
    /// PEM bundle with the client certificate chain and private key
    KeystoreLocation,
    KeystorePassword,
}

/// Read-only view of the embedding application's settings store.
pub trait SettingsProvider: Send + Sync {
    /// Raw stored value for `setting`, if any.
    fn string(&self, setting: Setting) -> Option<String>;

    /// Boolean view of a stored value; absent settings read as `false`.
    fn flag(&self, setting: Setting) -> bool {
        self.string(setting)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }
}

/// Expands string templates in raw setting values before they are used.
pub trait TemplateExpander: Send + Sync {
    fn expand(&self, raw: &str) -> String;
}

/// Provider with nothing configured: direct connection, default TLS trust.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSettings;

impl SettingsProvider for NoSettings {
    fn string(&self, _setting: Setting) -> Option<String> {
        None
    }
}

/// Expander that returns values verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerbatimExpander;

impl TemplateExpander for VerbatimExpander {
    fn expand(&self, raw: &str) -> String {
        raw.to_owned()
    }
}

/// In-memory provider for tests and embedding callers without a settings store.
#[derive(Debug, Default, Clone)]
pub struct MapSettings {
    values: HashMap<Setting, String>,
}

impl MapSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<V: Into<String>>(mut self, setting: Setting, value: V) -> Self {
        self.values.insert(setting, value.into());
        self
    }
}

impl SettingsProvider for MapSettings {
    fn string(&self, setting: Setting) -> Option<String> {
        self.values.get(&setting).cloned()
    }
}
