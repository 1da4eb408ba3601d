//! Egress proxies handed out by the proxy supplier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proxy protocol, inferred from the address scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    /// Infer the protocol from an address like `socks5://127.0.0.1:1080`.
    /// Addresses without a scheme are treated as plain HTTP proxies.
    pub fn from_address(address: &str) -> Self {
        match address.split_once("://").map(|(scheme, _)| scheme) {
            Some("socks5") | Some("socks5h") => ProxyProtocol::Socks5,
            Some("https") => ProxyProtocol::Https,
            _ => ProxyProtocol::Http,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyProtocol::Http => write!(f, "http"),
            ProxyProtocol::Https => write!(f, "https"),
            ProxyProtocol::Socks5 => write!(f, "socks5"),
        }
    }
}

/// A validated egress address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressProxy {
    pub address: String,
    pub protocol: ProxyProtocol,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl EgressProxy {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let protocol = ProxyProtocol::from_address(&address);
        Self {
            address,
            protocol,
            last_validated_at: None,
        }
    }

    /// Address usable by reqwest and Chrome's `--proxy-server`.
    /// Bare `host:port` addresses get an `http://` scheme.
    pub fn url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        }
    }
}
