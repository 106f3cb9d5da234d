// Store address normalization: `host` or `host:port`, default Consul port.
use crate::{KvError, KvResult};

pub const DEFAULT_CONSUL_PORT: u16 = 8500;

/// Normalize a store address to `host:port`.
///
/// A bare host gets [`DEFAULT_CONSUL_PORT`]. IPv6 literals must be bracketed
/// (`[::1]` or `[::1]:8501`).
///
/// ```
/// use policy_kv::resolve_address;
///
/// assert_eq!(resolve_address("consul.local").unwrap(), "consul.local:8500");
/// assert_eq!(resolve_address("10.0.0.5:8600").unwrap(), "10.0.0.5:8600");
/// assert!(resolve_address("a:b:c").is_err());
/// ```
pub fn resolve_address(addr: &str) -> KvResult<String> {
    let addr = addr.trim();
    let (host, port) = split_host_port(addr)?;
    if host.is_empty() {
        return Err(KvError::InvalidAddress(format!("missing host in {addr:?}")));
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| KvError::InvalidAddress(format!("invalid port in {addr:?}")))?,
        None => DEFAULT_CONSUL_PORT,
    };
    if host.contains(':') {
        Ok(format!("[{host}]:{port}"))
    } else {
        Ok(format!("{host}:{port}"))
    }
}

fn split_host_port(addr: &str) -> KvResult<(&str, Option<&str>)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| KvError::InvalidAddress(format!("missing ']' in {addr:?}")))?;
        let host = &rest[..end];
        let tail = &rest[end + 1..];
        if tail.is_empty() {
            return Ok((host, None));
        }
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, Some(port))),
            None => Err(KvError::InvalidAddress(format!(
                "unexpected characters after ']' in {addr:?}"
            ))),
        };
    }
    match addr.split_once(':') {
        None => Ok((addr, None)),
        Some((_, port)) if port.contains(':') => Err(KvError::InvalidAddress(format!(
            "too many colons in {addr:?}"
        ))),
        Some((host, port)) => Ok((host, Some(port))),
    }
}
