//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacity > 0, retry bounds)
//! - Check replica URLs parse and are not listed twice
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;

use crate::config::schema::ClientConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration for values that cannot work at runtime.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be greater than 0"));
    }
    if config.http.request_timeout_secs == 0 {
        errors.push(ValidationError::new("http.request_timeout_secs", "must be greater than 0"));
    }
    if config.http.long_request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "http.long_request_timeout_secs",
            "must be greater than 0",
        ));
    }
    if !(1..=10).contains(&config.retries.max_attempts) {
        errors.push(ValidationError::new("retries.max_attempts", "must be between 1 and 10"));
    }

    let mut seen = HashSet::new();
    for (i, destination) in config.replication.destinations.iter().enumerate() {
        let field = format!("replication.destinations[{}].url", i);
        if let Err(e) = url::Url::parse(&destination.url) {
            errors.push(ValidationError::new(field.clone(), format!("invalid url: {}", e)));
        }
        let key = destination.url.trim_end_matches('/').to_lowercase();
        if !seen.insert((key, destination.database.clone())) {
            errors.push(ValidationError::new(field, "duplicate destination"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DestinationConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = ClientConfig::default();
        config.cache.max_entries = 0;
        config.retries.max_attempts = 0;
        config.replication.destinations = vec![
            DestinationConfig {
                url: "not a url".into(),
                database: None,
                allow_writes: false,
            },
            DestinationConfig {
                url: "http://replica:8080".into(),
                database: None,
                allow_writes: false,
            },
            DestinationConfig {
                url: "http://REPLICA:8080/".into(),
                database: None,
                allow_writes: true,
            },
        ];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "cache.max_entries",
                "retries.max_attempts",
                "replication.destinations[0].url",
                "replication.destinations[2].url",
            ]
        );
        assert_eq!(errors[3].message, "duplicate destination");
    }
}
