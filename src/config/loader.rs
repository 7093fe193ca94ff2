//! Configuration loading from disk.

use std::path::Path;
use std::fs;
use crate::config::schema::ResiliencePolicy;
use crate::config::validation::{validate_policy, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate a policy from TOML text.
pub fn parse_policy(content: &str) -> Result<ResiliencePolicy, ConfigError> {
    let policy: ResiliencePolicy = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_policy(&policy).map_err(ConfigError::Validation)?;
    Ok(policy)
}

/// Load and validate a policy from a TOML file.
pub fn load_policy(path: &Path) -> Result<ResiliencePolicy, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_policy(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"postgres://localhost/app\"\n\n[health_check]\ninterval_secs = 10"
        )
        .unwrap();

        let policy = load_policy(file.path()).unwrap();
        assert_eq!(policy.database.url, "postgres://localhost/app");
        assert_eq!(policy.health_check.interval_secs, 10);
        assert_eq!(policy.health_check.timeout_secs, 30);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let policy = parse_policy("").unwrap();
        assert_eq!(policy.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_missing_file() {
        let err = load_policy(Path::new("/nonexistent/dbguard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_policy("[backoff\nmax_retries = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors_reported_together() {
        let err = parse_policy(
            "[circuit_breaker]\nfailure_threshold = 0\n\n[backoff]\nbackoff_multiplier = 0.5",
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {}", other),
        }
    }
}
