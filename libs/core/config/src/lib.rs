pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment, read from `APP_ENV`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Local,      // Developer machine or kind cluster
    Test,       // CI and test runs
    Stage,      // Pre-production cluster
    Production, // Full k8s cluster
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());

        match app_env.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "stage" | "staging" => Environment::Stage,
            "test" => Environment::Test,
            _ => Environment::Local,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_stage(&self) -> bool {
        matches!(self, Environment::Stage)
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Environment::Test)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Environment::Local)
    }

    // Verbose driver output is only allowed outside deployed clusters
    pub fn allows_query_tracing(&self) -> bool {
        self.is_local() || self.is_test()
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Returns the variable if it is set and not blank
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parses an optional variable, failing only when it is set to something unparsable
pub fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_optional(key)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_local() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Local);
            assert!(env.is_local());
            assert!(!env.is_production());
            assert!(env.allows_query_tracing());
        });
    }

    #[test]
    fn test_environment_production() {
        temp_env::with_var("APP_ENV", Some("production"), || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Production);
            assert!(env.is_production());
            assert!(!env.allows_query_tracing());
        });
    }

    #[test]
    fn test_environment_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });

        temp_env::with_var("APP_ENV", Some("Stage"), || {
            assert_eq!(Environment::from_env(), Environment::Stage);
        });
    }

    #[test]
    fn test_environment_test_and_stage() {
        temp_env::with_var("APP_ENV", Some("test"), || {
            let env = Environment::from_env();
            assert!(env.is_test());
            assert!(env.allows_query_tracing());
        });

        temp_env::with_var("APP_ENV", Some("staging"), || {
            let env = Environment::from_env();
            assert!(env.is_stage());
            assert!(!env.allows_query_tracing());
        });
    }

    #[test]
    fn test_env_or_default_with_value() {
        temp_env::with_var("TEST_VAR", Some("test_value"), || {
            let result = env_or_default("TEST_VAR", "default");
            assert_eq!(result, "test_value");
        });
    }

    #[test]
    fn test_env_or_default_without_value() {
        temp_env::with_var_unset("MISSING_VAR", || {
            let result = env_or_default("MISSING_VAR", "default_value");
            assert_eq!(result, "default_value");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("MISSING_REQUIRED", || {
            let result = env_required("MISSING_REQUIRED");
            assert!(result.is_err());
            let err = result.unwrap_err();
            assert!(err.to_string().contains("MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_optional_treats_blank_as_unset() {
        temp_env::with_var("BLANK_VAR", Some("   "), || {
            assert_eq!(env_optional("BLANK_VAR"), None);
        });
        temp_env::with_var("SET_VAR", Some("value"), || {
            assert_eq!(env_optional("SET_VAR").as_deref(), Some("value"));
        });
    }

    #[test]
    fn test_env_parse() {
        temp_env::with_var("PORT_VAR", Some("27017"), || {
            let port: Option<u16> = env_parse("PORT_VAR").unwrap();
            assert_eq!(port, Some(27017));
        });

        temp_env::with_var_unset("PORT_VAR", || {
            let port: Option<u16> = env_parse("PORT_VAR").unwrap();
            assert_eq!(port, None);
        });

        temp_env::with_var("PORT_VAR", Some("not-a-port"), || {
            let err = env_parse::<u16>("PORT_VAR").unwrap_err();
            assert!(err.to_string().contains("PORT_VAR"));
        });
    }
}
