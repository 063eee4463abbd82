//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, connection limit > 0)
//! - Check addresses parse and that forwarding does not loop back
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::config::schema::ProxyConfig;

/// One rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let bind = config.listener.bind_address.parse::<SocketAddr>();
    if bind.is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.hostname.trim().is_empty() {
        errors.push(ValidationError::new("listener.hostname", "must not be empty"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than 0",
        ));
    }

    if let Some(forward) = &config.forward.address {
        match split_host_port(forward) {
            None => errors.push(ValidationError::new(
                "forward.address",
                format!("expected host:port, got {forward}"),
            )),
            Some((host, port)) => {
                let loops_back = match &bind {
                    Ok(bind) => {
                        port == bind.port()
                            && (host.eq_ignore_ascii_case(&config.listener.hostname)
                                || host.parse::<IpAddr>().ok() == Some(bind.ip()))
                    }
                    Err(_) => false,
                };
                if loops_back || forward == &config.listener.bind_address {
                    errors.push(ValidationError::new(
                        "forward.address",
                        "must not point at the proxy itself",
                    ));
                }
            }
        }
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.server_secs", config.timeouts.server_secs),
        ("timeouts.server_idle_secs", config.timeouts.server_idle_secs),
        ("timeouts.client_wait_secs", config.timeouts.client_wait_secs),
        ("maintenance.tick_secs", config.maintenance.tick_secs),
        (
            "maintenance.rules_refresh_secs",
            config.maintenance.rules_refresh_secs,
        ),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "not a socket address: {}",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
