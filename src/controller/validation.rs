//! # Validation
//!
//! Validates the declared `SoftwareFactory` spec before anything is written.
//!
//! Failures are [`ReconcileError::InvalidSpec`]: they halt convergence until the spec
//! is fixed.

use crate::constants::RESERVED_CONNECTION_NAME;
use crate::crd::SoftwareFactorySpec;
use crate::error::{ReconcileError, Result};
use regex::Regex;
use std::collections::BTreeSet;

fn invalid(message: String) -> ReconcileError {
    ReconcileError::InvalidSpec(message)
}

/// Validate a DNS subdomain (RFC 1123)
/// Format: lowercase alphanumeric, hyphens, dots
/// Length: 1-253 characters
fn validate_dns_subdomain(value: &str, field_name: &str) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(format!("{field_name} cannot be empty")));
    }
    if trimmed.len() > 253 {
        return Err(invalid(format!(
            "{field_name} '{trimmed}' exceeds maximum length of 253 characters (got {})",
            trimmed.len()
        )));
    }
    let name_regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .map_err(|e| invalid(format!("Failed to compile regex: {e}")))?;
    if !name_regex.is_match(trimmed) {
        return Err(invalid(format!(
            "{field_name} '{trimmed}' must be lowercase alphanumeric, hyphens and dots"
        )));
    }
    Ok(())
}

/// Validate the declared spec
///
/// Checks:
/// - `fqdn` is a valid DNS name
/// - connection names are unique across all connection kinds
/// - no connection uses the name reserved for the internal git server
/// - referenced credentials are valid object names
/// - the config repository refers to a declared connection
pub fn validate_spec(spec: &SoftwareFactorySpec) -> Result<()> {
    validate_dns_subdomain(&spec.fqdn, "fqdn")?;

    let mut seen = BTreeSet::new();
    for name in spec.connection_names() {
        if name.trim().is_empty() {
            return Err(invalid("connection name cannot be empty".to_string()));
        }
        if name == RESERVED_CONNECTION_NAME {
            return Err(invalid(format!(
                "connection name '{RESERVED_CONNECTION_NAME}' is reserved for the internal git server"
            )));
        }
        if !seen.insert(name) {
            return Err(invalid(format!("connection name '{name}' is declared twice")));
        }
    }

    for secret in spec.connection_secrets() {
        validate_dns_subdomain(&secret, "connection secret")?;
    }

    if let Some(location) = &spec.config_location {
        let connection = location.zuul_connection_name.as_str();
        if connection != RESERVED_CONNECTION_NAME && !seen.contains(connection) {
            return Err(invalid(format!(
                "config-location refers to unknown connection '{connection}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConfigRepositoryLocationSpec, GerritConnection, GitConnection};

    fn spec() -> SoftwareFactorySpec {
        SoftwareFactorySpec {
            fqdn: "sfop.me".to_string(),
            ..SoftwareFactorySpec::default()
        }
    }

    fn gerrit(name: &str) -> GerritConnection {
        GerritConnection {
            name: name.to_string(),
            hostname: "review.sfop.me".to_string(),
            ..GerritConnection::default()
        }
    }

    #[test]
    fn test_valid_spec() {
        let mut spec = spec();
        spec.zuul.gerritconns.push(gerrit("review"));
        spec.config_location = Some(ConfigRepositoryLocationSpec {
            base_url: "https://review.sfop.me".to_string(),
            name: "config".to_string(),
            branch: None,
            zuul_connection_name: "review".to_string(),
        });
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn test_duplicate_connection_names_across_kinds() {
        let mut spec = spec();
        spec.zuul.gerritconns.push(gerrit("review"));
        spec.zuul.gitconns.push(GitConnection {
            name: "review".to_string(),
            baseurl: "https://example.com".to_string(),
        });
        let err = validate_spec(&spec).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSpec(_)));
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_reserved_connection_name() {
        let mut spec = spec();
        spec.zuul.gerritconns.push(gerrit(RESERVED_CONNECTION_NAME));
        assert!(matches!(
            validate_spec(&spec),
            Err(ReconcileError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_invalid_fqdn() {
        let mut spec = spec();
        spec.fqdn = "Not A Domain".to_string();
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_unknown_config_connection() {
        let mut spec = spec();
        spec.config_location = Some(ConfigRepositoryLocationSpec {
            base_url: "https://example.com".to_string(),
            name: "config".to_string(),
            branch: None,
            zuul_connection_name: "missing".to_string(),
        });
        assert!(validate_spec(&spec).is_err());
    }
}
