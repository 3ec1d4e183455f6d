//! Provider endpoint reachability validation
//!
//! Validates that provider endpoints resolve and accept TCP connections.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Validate provider endpoint connectivity
pub async fn validate_endpoints(config: &Config, connect_timeout: Duration) -> ValidationResult {
    let mut result = ValidationResult::new();

    for provider in &config.providers {
        let address = match socket_address(&provider.endpoint) {
            Ok(address) => address,
            Err(reason) => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Network,
                    format!(
                        "Provider '{}' endpoint '{}' is not usable: {}",
                        provider.id, provider.endpoint, reason
                    ),
                ));
                continue;
            }
        };

        // Try to connect to the provider with timeout
        match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => {
                // Connection successful
            }
            Ok(Err(e)) => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Network,
                    format!(
                        "Provider '{}' endpoint '{}' unreachable: {}",
                        provider.id, address, e
                    ),
                ));
            }
            Err(_) => {
                result.add_warning(ValidationWarning::new(format!(
                    "Provider '{}' endpoint '{}' connection timeout ({}ms)",
                    provider.id,
                    address,
                    connect_timeout.as_millis()
                )));
            }
        }
    }

    result
}

/// `host:port` for an endpoint URL, using the scheme's default port.
fn socket_address(endpoint: &str) -> Result<String, String> {
    let url = Url::parse(endpoint).map_err(|e| e.to_string())?;
    let host = url.host_str().ok_or_else(|| "missing host".to_string())?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| format!("no default port for scheme '{}'", url.scheme()))?;
    Ok(format!("{}:{}", host, port))
}
