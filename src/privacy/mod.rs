//! Egress proxy routing.
//!
//! Requests can be routed through a pool of HTTP or SOCKS proxies. The
//! [`ProxySupplier`] validates an address before handing it out and retires
//! addresses that fail.
//!
//! # Configuration
//!
//! - `SOCKS_PROXY=socks5://...` - add a fixed proxy to the pool
//! - `FILM_PROXY_POOL_URL=http://...` - endpoint returning a fresh `host:port`
//!
//! ```toml
//! [proxy]
//! enabled = true
//! addresses = ["127.0.0.1:8080", "socks5://127.0.0.1:9050"]
//! probe_url = "https://www.douban.com"
//! probe_timeout_ms = 5000
//! ```

mod config;
mod supplier;

pub use config::ProxyConfig;
pub use supplier::{HttpProbe, PoolUrlSource, ProxyProbe, ProxySource, ProxySupplier};
