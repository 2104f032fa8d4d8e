//! Environment-backed configuration, read with [`envy`] after `.env` is loaded.
//!
//! Variable names match struct fields case-insensitively (`DATABASE_URL` -> `database_url`),
//! and sequences are comma-separated (`CHECKIN_REWARDS=5, 10, 15`).

use std::sync::LazyLock;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);
pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(match var {
        Var::DatabaseUrl => &vars.database_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::InternalToken => &vars.internal_token,
        Var::CorsAllowOrigins => &vars.cors_allow_origins,
        Var::OtelExporterEndpoint => &vars.otel_exporter_otlp_endpoint,
        Var::ApiServiceName => &vars.api_service_name,
        Var::ApiTracerName => &vars.api_tracer_name,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct Env {
    pub database_url: String,
    pub server_api_port: String,
    pub internal_token: String,
    #[serde(default = "default_cors_origins")]
    pub cors_allow_origins: String,
    /// Empty (or `stdout`) routes telemetry to the console instead of an OTLP collector
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: String,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
    #[serde(default = "default_tracer_name")]
    pub api_tracer_name: String,
}

fn default_cors_origins() -> String {
    String::from("*")
}

fn default_service_name() -> String {
    String::from("tribute-ledger-api")
}

fn default_tracer_name() -> String {
    String::from("tribute-ledger-tracer")
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        from_env::<Env>()
    }
}

#[derive(Debug)]
pub enum Var {
    DatabaseUrl,
    ServerApiPort,
    InternalToken,
    CorsAllowOrigins,
    OtelExporterEndpoint,
    ApiServiceName,
    ApiTracerName,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

/// Reads `T` from the process environment, loading `.env` first if one is present
pub fn from_env<T: DeserializeOwned>() -> EnvResult<T> {
    _ = dotenvy::dotenv();
    from_iter(std::env::vars())
}

pub fn from_iter<T: DeserializeOwned>(
    vars: impl IntoIterator<Item = (String, String)>,
) -> EnvResult<T> {
    Ok(envy::from_iter(normalized(vars))?)
}

/// Like [`from_env`], restricted to variables starting with `prefix`. The prefix is stripped
/// before names are matched against fields.
pub fn prefixed_from_env<T: DeserializeOwned>(prefix: &str) -> EnvResult<T> {
    _ = dotenvy::dotenv();
    prefixed_from_iter(prefix, std::env::vars())
}

pub fn prefixed_from_iter<T: DeserializeOwned>(
    prefix: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> EnvResult<T> {
    Ok(envy::prefixed(prefix).from_iter(normalized(vars))?)
}

/// Trims whitespace around each comma-separated element
fn normalized(
    vars: impl IntoIterator<Item = (String, String)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter().map(|(k, v)| {
        let v = v.split(',').map(str::trim).collect::<Vec<_>>().join(",");
        (k, v)
    })
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error("env deserialization error: {0}")]
    DeserializationError(#[from] envy::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_defaults_and_required() {
        let env: Env = from_iter(vars(&[
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("SERVER_API_PORT", "8080"),
            ("INTERNAL_TOKEN", "secret"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(env.database_url, "postgres://localhost/ledger");
        assert_eq!(env.cors_allow_origins, "*");
        assert!(env.otel_exporter_otlp_endpoint.is_empty());

        let missing = from_iter::<Env>(vars(&[("SERVER_API_PORT", "8080")]));
        assert!(matches!(
            missing,
            Err(EnvErr::DeserializationError(envy::Error::MissingValue(_)))
        ));
    }

    #[test]
    fn test_comma_separated_sequence() {
        #[derive(Deserialize)]
        struct Rewards {
            checkin_rewards: Vec<i64>,
        }

        let parsed: Rewards = from_iter(vars(&[("CHECKIN_REWARDS", "5, 10 ,15")])).unwrap();
        assert_eq!(parsed.checkin_rewards, vec![5, 10, 15]);

        let bad = from_iter::<Rewards>(vars(&[("CHECKIN_REWARDS", "5,ten")]));
        assert!(matches!(
            bad,
            Err(EnvErr::DeserializationError(envy::Error::Custom(_)))
        ));
    }

    #[test]
    fn test_prefixed_strips_prefix() {
        #[derive(Deserialize)]
        struct Schedule {
            lesson_read: i64,
        }

        let parsed: Schedule = prefixed_from_iter(
            "REWARD_",
            vars(&[("REWARD_LESSON_READ", "12"), ("LESSON_READ", "1")]),
        )
        .unwrap();
        assert_eq!(parsed.lesson_read, 12);
    }
}
