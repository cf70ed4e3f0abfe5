//! Connection parameters and endpoint configuration assembly.
//!
//! [`EndpointConfig::assemble`] translates caller-supplied
//! [`ConnectionParams`] plus ambient settings into the immutable configuration
//! used for every connection attempt. Only a malformed target URI fails here;
//! every other configuration problem (for example a bad keystore) surfaces
//! when a connect attempt is actually made.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret as _, SecretString};
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::settings::{Setting, SettingsProvider, TemplateExpander};

/// Environment override for the client keystore location; takes precedence
/// over [`Setting::KeystoreLocation`].
pub const KEYSTORE_LOCATION_VAR: &str = "WS_SESSION_KEYSTORE";

/// Environment override for the keystore password; same precedence as
/// [`KEYSTORE_LOCATION_VAR`].
pub const KEYSTORE_PASSWORD_VAR: &str = "WS_SESSION_KEYSTORE_PASSWORD";

/// Immutable caller input for one logical session.
#[derive(Debug, Clone, bon::Builder)]
pub struct ConnectionParams {
    /// Target endpoint; a missing scheme defaults to `ws://`.
    #[builder(into)]
    pub uri: String,
    /// Comma-separated subprotocol names, most preferred first.
    #[builder(into)]
    pub subprotocols: Option<String>,
    /// Login for basic authentication during the handshake.
    #[builder(into)]
    pub login: Option<String>,
    /// Password for basic authentication; absent means empty.
    #[builder(into)]
    pub password: Option<SecretString>,
}

/// Basic authentication material attached to the handshake.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub login: String,
    pub password: SecretString,
}

impl BasicCredentials {
    /// `Authorization` header value for these credentials.
    #[must_use]
    pub fn header_value(&self) -> String {
        basic_authorization(&self.login, self.password.expose_secret())
    }
}

/// Explicit proxy for connection attempts.
///
/// Negotiation itself is delegated to the transport layer; this only carries
/// the assembled URI and the prebuilt authorization header value.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// `scheme://host:port`, unvalidated until the transport uses it.
    pub uri: String,
    /// `Proxy-Authorization` header value, when proxy credentials are set.
    pub authorization: Option<String>,
}

/// Client TLS material resolved from settings and environment overrides.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// PEM bundle holding the client certificate chain and private key.
    pub keystore: PathBuf,
    pub password: Option<SecretString>,
}

/// Everything a transport needs for one connection attempt.
///
/// Derived once at construction time and never mutated afterwards. Handshake
/// and session idle timeouts are deliberately unbounded; callers needing
/// bounded waiting apply their own timeout or cancellation externally.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub uri: Url,
    /// Ordered subprotocol preference list, most preferred first.
    pub subprotocols: Vec<String>,
    pub credentials: Option<BasicCredentials>,
    pub proxy: Option<ProxyConfig>,
    pub tls: Option<TlsConfig>,
    /// HTTP redirect following during the handshake; on by default.
    pub follow_redirects: bool,
}

impl EndpointConfig {
    pub fn assemble(
        params: &ConnectionParams,
        settings: &dyn SettingsProvider,
        expander: &dyn TemplateExpander,
    ) -> Result<Self> {
        let uri = parse_target_uri(&params.uri)?;

        let subprotocols = params
            .subprotocols
            .as_deref()
            .map(split_subprotocols)
            .unwrap_or_default();

        let credentials = params.login.as_ref().map(|login| BasicCredentials {
            login: login.clone(),
            // an absent password authenticates with an empty one
            password: params
                .password
                .clone()
                .unwrap_or_else(|| SecretString::from("")),
        });

        Ok(Self {
            uri,
            subprotocols,
            credentials,
            proxy: assemble_proxy(settings, expander),
            tls: assemble_tls(settings, expander),
            follow_redirects: true,
        })
    }
}

fn parse_target_uri(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::configuration("target URI is empty"));
    }
    let normalized = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("ws://{trimmed}")
    };
    Ok(Url::parse(&normalized)?)
}

fn split_subprotocols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Explicit proxy applies only when enabled and not in autodetect mode;
/// autodetection, if any, is left to the transport and OS.
fn assemble_proxy(
    settings: &dyn SettingsProvider,
    expander: &dyn TemplateExpander,
) -> Option<ProxyConfig> {
    if !settings.flag(Setting::ProxyEnabled) || settings.flag(Setting::ProxyAutodetect) {
        return None;
    }

    let host = expanded(settings, expander, Setting::ProxyHost)?;
    let port = expanded(settings, expander, Setting::ProxyPort)?;

    let authorization = expanded(settings, expander, Setting::ProxyUsername).map(|user| {
        let password = expanded(settings, expander, Setting::ProxyPassword).unwrap_or_default();
        basic_authorization(&user, &password)
    });

    Some(ProxyConfig {
        uri: format!("http://{host}:{port}"),
        authorization,
    })
}

fn assemble_tls(
    settings: &dyn SettingsProvider,
    expander: &dyn TemplateExpander,
) -> Option<TlsConfig> {
    let keystore = std::env::var(KEYSTORE_LOCATION_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| expanded(settings, expander, Setting::KeystoreLocation))?;

    let password = std::env::var(KEYSTORE_PASSWORD_VAR)
        .ok()
        .or_else(|| expanded(settings, expander, Setting::KeystorePassword))
        .map(SecretString::from);

    Some(TlsConfig {
        keystore: PathBuf::from(keystore),
        password,
    })
}

/// Stored value passed through template expansion; empty results count as
/// absent.
fn expanded(
    settings: &dyn SettingsProvider,
    expander: &dyn TemplateExpander,
    setting: Setting,
) -> Option<String> {
    let raw = settings.string(setting)?;
    let value = expander.expand(&raw);
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn basic_authorization(login: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{login}:{password}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;
    use crate::settings::{MapSettings, NoSettings, VerbatimExpander};

    fn assemble(params: &ConnectionParams, settings: &dyn SettingsProvider) -> EndpointConfig {
        EndpointConfig::assemble(params, settings, &VerbatimExpander).unwrap()
    }

    #[test]
    fn malformed_uri_is_rejected_at_construction() {
        let params = ConnectionParams::builder().uri("::not a uri::").build();

        let error = EndpointConfig::assemble(&params, &NoSettings, &VerbatimExpander).unwrap_err();
        assert_eq!(error.kind(), Kind::Configuration);
    }

    #[test]
    fn missing_scheme_defaults_to_ws() {
        let params = ConnectionParams::builder().uri("host.test/path").build();

        let config = assemble(&params, &NoSettings);
        assert_eq!(config.uri.scheme(), "ws");
        assert_eq!(config.uri.host_str(), Some("host.test"));
        assert!(config.follow_redirects);
    }

    #[test]
    fn subprotocols_keep_preference_order() {
        let params = ConnectionParams::builder()
            .uri("ws://host.test")
            .subprotocols("chat, superchat ,,fallback")
            .build();

        let config = assemble(&params, &NoSettings);
        assert_eq!(config.subprotocols, ["chat", "superchat", "fallback"]);
    }

    #[test]
    fn absent_password_authenticates_empty() {
        let params = ConnectionParams::builder()
            .uri("ws://host.test")
            .login("user")
            .build();

        let credentials = assemble(&params, &NoSettings).credentials.unwrap();
        // base64("user:")
        assert_eq!(credentials.header_value(), "Basic dXNlcjo=");
    }

    #[test]
    fn proxy_needs_enabled_without_autodetect() {
        let params = ConnectionParams::builder().uri("ws://host.test").build();

        let enabled = MapSettings::new()
            .with(Setting::ProxyEnabled, "true")
            .with(Setting::ProxyHost, "proxy.local")
            .with(Setting::ProxyPort, "8080");
        let config = assemble(&params, &enabled);
        assert_eq!(config.proxy.unwrap().uri, "http://proxy.local:8080");

        let autodetect = enabled.clone().with(Setting::ProxyAutodetect, "true");
        assert!(assemble(&params, &autodetect).proxy.is_none());

        let disabled = MapSettings::new()
            .with(Setting::ProxyHost, "proxy.local")
            .with(Setting::ProxyPort, "8080");
        assert!(assemble(&params, &disabled).proxy.is_none());
    }

    #[test]
    fn proxy_credentials_become_basic_authorization() {
        let params = ConnectionParams::builder().uri("ws://host.test").build();
        let settings = MapSettings::new()
            .with(Setting::ProxyEnabled, "true")
            .with(Setting::ProxyHost, "proxy.local")
            .with(Setting::ProxyPort, "3128")
            .with(Setting::ProxyUsername, "user")
            .with(Setting::ProxyPassword, "pass");

        let proxy = assemble(&params, &settings).proxy.unwrap();
        // base64("user:pass")
        assert_eq!(proxy.authorization.as_deref(), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn proxy_values_are_template_expanded() {
        struct HostExpander;
        impl TemplateExpander for HostExpander {
            fn expand(&self, raw: &str) -> String {
                raw.replace("${proxy.host}", "expanded.local")
            }
        }

        let params = ConnectionParams::builder().uri("ws://host.test").build();
        let settings = MapSettings::new()
            .with(Setting::ProxyEnabled, "true")
            .with(Setting::ProxyHost, "${proxy.host}")
            .with(Setting::ProxyPort, "8080");

        let config = EndpointConfig::assemble(&params, &settings, &HostExpander).unwrap();
        assert_eq!(config.proxy.unwrap().uri, "http://expanded.local:8080");
    }

    #[test]
    fn keystore_comes_from_settings() {
        let params = ConnectionParams::builder().uri("wss://host.test").build();
        let settings = MapSettings::new()
            .with(Setting::KeystoreLocation, "/etc/pki/client.pem")
            .with(Setting::KeystorePassword, "secret");

        let tls = assemble(&params, &settings).tls.unwrap();
        assert_eq!(tls.keystore, PathBuf::from("/etc/pki/client.pem"));
        assert!(tls.password.is_some());
    }

    #[test]
    fn environment_overrides_stored_keystore() {
        let params = ConnectionParams::builder().uri("wss://host.test").build();
        let settings = MapSettings::new().with(Setting::KeystoreLocation, "/stored/client.pem");

        // set_var is unsafe in edition 2024; this test owns the variable
        unsafe { std::env::set_var(KEYSTORE_LOCATION_VAR, "/override/client.pem") };
        let tls = assemble(&params, &settings).tls.unwrap();
        unsafe { std::env::remove_var(KEYSTORE_LOCATION_VAR) };

        assert_eq!(tls.keystore, PathBuf::from("/override/client.pem"));
    }
}
