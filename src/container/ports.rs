//! Host port pre-flight checks
//!
//! The probe is best-effort: another process can take the port between the probe and the
//! engine's own bind at container start, which remains the authoritative failure point.

use std::net::{Ipv4Addr, TcpListener};

use tracing::debug;

use super::error::{ContainerError, PortRole};

/// Try to bind a listener on the port on all interfaces; the listener is dropped right away
pub fn is_port_available(port: u16) -> bool {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(_listener) => true,
        Err(e) => {
            debug!(port, error = %e, "Port probe failed");
            false
        }
    }
}

/// Parse a caller-supplied host port (1..=65535)
pub fn parse_port(role: PortRole, value: &str) -> Result<u16, ContainerError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ContainerError::InvalidPort {
            role,
            value: value.to_string(),
        }),
    }
}

/// Fail on the first port that cannot be bound
pub fn ensure_available(ports: &[(PortRole, u16)]) -> Result<(), ContainerError> {
    for &(role, port) in ports {
        if !is_port_available(port) {
            return Err(ContainerError::PortUnavailable { role, port });
        }
    }
    Ok(())
}
