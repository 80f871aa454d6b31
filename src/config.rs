//! Process-wide configuration, resolved once from the environment at startup.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_LOGIN_API: &str = "https://ws-cadc.canfar.net/ac";
pub const DEFAULT_SKAHA_API: &str = "https://ws-uv.canfar.net/skaha/v0";
pub const DEFAULT_STORAGE_API: &str = "https://ws-uv.canfar.net/arc";
pub const DEFAULT_OIDC_SCOPE: &str = "openid profile email";
pub const DEFAULT_MAX_INSTANCES: u64 = 100;

const DEFAULT_LOGIN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SKAHA_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 30_000;

const PLACEHOLDER: &str = "placeholder";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing OIDC configuration: {}", .missing.join(", "))]
    MissingOidc { missing: Vec<&'static str> },
    #[error("invalid AUTH_MODE '{0}', expected 'oidc' or 'canfar'")]
    InvalidAuthMode(String),
    #[error("{var} is not a valid URL: {value}")]
    InvalidUrl { var: &'static str, value: String },
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
    #[error("OIDC configuration is a build-time placeholder and cannot serve requests")]
    PlaceholderOidc,
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
    #[error("failed to register metric: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Where configuration values come from. Tests hand in a map instead of
/// touching the process environment.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment. Blank values count as unset.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Cookie-based login against the CANFAR login service.
    Canfar,
    Oidc,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Canfar => f.write_str("canfar"),
            AuthMode::Oidc => f.write_str("oidc"),
        }
    }
}

impl AuthMode {
    pub fn resolve(env: &impl EnvSource) -> Result<Self, ConfigError> {
        if env.var("USE_CANFAR").as_deref().is_some_and(is_truthy) {
            return Ok(AuthMode::Canfar);
        }
        match env.var("AUTH_MODE") {
            None => Ok(AuthMode::Canfar),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "oidc" => Ok(AuthMode::Oidc),
                "canfar" | "legacy" => Ok(AuthMode::Canfar),
                _ => Err(ConfigError::InvalidAuthMode(value)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    /// `redirect_uri` sent to the provider.
    pub callback_url: String,
    /// Where the browser goes once the exchange succeeded.
    pub redirect_url: String,
    pub scope: String,
    /// True when required values were absent and `OIDC_ALLOW_MISSING` was set.
    pub placeholder: bool,
}

impl OidcConfig {
    pub fn resolve(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let required = [
            "OIDC_URI",
            "OIDC_CLIENT_ID",
            "OIDC_CLIENT_SECRET",
            "OIDC_CALLBACK_URI",
            "OIDC_REDIRECT_URI",
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .copied()
            .filter(|key| env.var(key).is_none())
            .collect();

        let scope = env
            .var("OIDC_SCOPE")
            .unwrap_or_else(|| DEFAULT_OIDC_SCOPE.to_string());

        if !missing.is_empty() {
            if env.var("OIDC_ALLOW_MISSING").as_deref().is_some_and(is_truthy) {
                return Ok(Self::placeholder(scope));
            }
            return Err(ConfigError::MissingOidc { missing });
        }

        let get = |key: &str| env.var(key).unwrap_or_default();
        let issuer = get("OIDC_URI").trim_end_matches('/').to_string();
        validate_url("OIDC_URI", &issuer)?;

        Ok(Self {
            issuer,
            client_id: get("OIDC_CLIENT_ID"),
            client_secret: get("OIDC_CLIENT_SECRET"),
            callback_url: get("OIDC_CALLBACK_URI"),
            redirect_url: get("OIDC_REDIRECT_URI"),
            scope,
            placeholder: false,
        })
    }

    fn placeholder(scope: String) -> Self {
        Self {
            issuer: format!("https://{PLACEHOLDER}.invalid"),
            client_id: PLACEHOLDER.to_string(),
            client_secret: PLACEHOLDER.to_string(),
            callback_url: format!("https://{PLACEHOLDER}.invalid/callback"),
            redirect_url: format!("https://{PLACEHOLDER}.invalid/"),
            scope,
            placeholder: true,
        }
    }

    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.issuer)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamUrls {
    pub login: String,
    pub skaha: String,
    pub storage: String,
}

#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    pub login: Duration,
    pub skaha: Duration,
    pub storage: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub auth_mode: AuthMode,
    /// Present only in OIDC mode.
    pub oidc: Option<OidcConfig>,
    pub upstreams: UpstreamUrls,
    pub timeouts: UpstreamTimeouts,
    pub max_instances: u64,
    pub production: bool,
}

impl GatewayConfig {
    pub fn from_env(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let auth_mode = AuthMode::resolve(env)?;
        let oidc = match auth_mode {
            AuthMode::Oidc => Some(OidcConfig::resolve(env)?),
            AuthMode::Canfar => None,
        };

        let upstreams = UpstreamUrls {
            login: base_url(env, "LOGIN_API", DEFAULT_LOGIN_API)?,
            skaha: base_url(env, "SKAHA_API", DEFAULT_SKAHA_API)?,
            storage: base_url(env, "STORAGE_API", DEFAULT_STORAGE_API)?,
        };

        let timeouts = UpstreamTimeouts {
            login: Duration::from_millis(number(env, "LOGIN_TIMEOUT_MS", DEFAULT_LOGIN_TIMEOUT_MS)?),
            skaha: Duration::from_millis(number(env, "SKAHA_TIMEOUT_MS", DEFAULT_SKAHA_TIMEOUT_MS)?),
            storage: Duration::from_millis(number(
                env,
                "STORAGE_TIMEOUT_MS",
                DEFAULT_STORAGE_TIMEOUT_MS,
            )?),
        };

        let production = env
            .var("APP_ENV")
            .or_else(|| env.var("NODE_ENV"))
            .is_some_and(|v| v.eq_ignore_ascii_case("production"));

        Ok(Self {
            auth_mode,
            oidc,
            upstreams,
            timeouts,
            max_instances: number(env, "SKAHA_MAX_INSTANCES", DEFAULT_MAX_INSTANCES)?,
            production,
        })
    }

    /// Fails when the config can only have come from a static build.
    pub fn ensure_servable(&self) -> Result<(), ConfigError> {
        match &self.oidc {
            Some(oidc) if oidc.placeholder => Err(ConfigError::PlaceholderOidc),
            _ => Ok(()),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn validate_url(var: &'static str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            var,
            value: value.to_string(),
        }),
    }
}

fn base_url(
    env: &impl EnvSource,
    var: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    let value = env.var(var).unwrap_or_else(|| default.to_string());
    let value = value.trim().trim_end_matches('/').to_string();
    validate_url(var, &value)?;
    Ok(value)
}

fn number(env: &impl EnvSource, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env.var(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_oidc() -> HashMap<String, String> {
        env(&[
            ("AUTH_MODE", "oidc"),
            ("OIDC_URI", "https://iam.example.org/"),
            ("OIDC_CLIENT_ID", "portal"),
            ("OIDC_CLIENT_SECRET", "s3cret"),
            ("OIDC_CALLBACK_URI", "https://portal.example.org/callback"),
            ("OIDC_REDIRECT_URI", "https://portal.example.org/"),
        ])
    }

    #[test]
    fn defaults_to_canfar_mode() {
        let config = GatewayConfig::from_env(&env(&[])).unwrap();
        assert_eq!(config.auth_mode, AuthMode::Canfar);
        assert!(config.oidc.is_none());
        assert_eq!(config.upstreams.skaha, DEFAULT_SKAHA_API);
        assert_eq!(config.timeouts.login, Duration::from_millis(10_000));
        assert!(!config.production);
    }

    #[test]
    fn use_canfar_overrides_auth_mode() {
        let mut vars = full_oidc();
        vars.insert("USE_CANFAR".into(), "true".into());
        assert_eq!(AuthMode::resolve(&vars).unwrap(), AuthMode::Canfar);
    }

    #[test]
    fn rejects_unknown_auth_mode() {
        let err = AuthMode::resolve(&env(&[("AUTH_MODE", "saml")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAuthMode(ref v) if v == "saml"));
    }

    #[test]
    fn oidc_config_trims_issuer_and_defaults_scope() {
        let config = GatewayConfig::from_env(&full_oidc()).unwrap();
        let oidc = config.oidc.unwrap();
        assert_eq!(oidc.issuer, "https://iam.example.org");
        assert_eq!(oidc.scope, DEFAULT_OIDC_SCOPE);
        assert_eq!(
            oidc.discovery_url(),
            "https://iam.example.org/.well-known/openid-configuration"
        );
        assert!(!oidc.placeholder);
    }

    #[test]
    fn missing_oidc_values_are_enumerated() {
        let vars = env(&[("AUTH_MODE", "oidc"), ("OIDC_CLIENT_ID", "portal")]);
        match GatewayConfig::from_env(&vars).unwrap_err() {
            ConfigError::MissingOidc { missing } => assert_eq!(
                missing,
                vec![
                    "OIDC_URI",
                    "OIDC_CLIENT_SECRET",
                    "OIDC_CALLBACK_URI",
                    "OIDC_REDIRECT_URI"
                ]
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allow_missing_yields_placeholder_that_cannot_serve() {
        let vars = env(&[("AUTH_MODE", "oidc"), ("OIDC_ALLOW_MISSING", "1")]);
        let config = GatewayConfig::from_env(&vars).unwrap();
        assert!(config.oidc.as_ref().unwrap().placeholder);
        assert!(matches!(
            config.ensure_servable(),
            Err(ConfigError::PlaceholderOidc)
        ));
    }

    #[test]
    fn invalid_timeout_is_reported() {
        let err = GatewayConfig::from_env(&env(&[("SKAHA_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { var: "SKAHA_TIMEOUT_MS", .. }
        ));
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let err = GatewayConfig::from_env(&env(&[("STORAGE_API", "not a url")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { var: "STORAGE_API", .. }));
    }

    #[test]
    fn production_flag_from_app_env() {
        let config = GatewayConfig::from_env(&env(&[("APP_ENV", "production")])).unwrap();
        assert!(config.production);
    }
}
