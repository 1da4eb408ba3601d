//! User agent pool for direct requests.

use rand::seq::IndexedRandom;

/// Real browser user agents rotated across requests.
pub const IMPERSONATE_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// A pool of user agents, one picked at random per request.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    /// Build a pool from configured agents, falling back to the built-in
    /// list when none are configured.
    pub fn new(agents: &[String]) -> Self {
        let agents: Vec<String> = agents
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        if agents.is_empty() {
            Self::default()
        } else {
            Self { agents }
        }
    }

    /// Pick a random user agent.
    pub fn pick(&self) -> &str {
        self.agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(IMPERSONATE_USER_AGENTS[0])
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self {
            agents: IMPERSONATE_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_builtin_pool() {
        let pool = UserAgentPool::new(&[" ".to_string()]);
        assert_eq!(pool.len(), IMPERSONATE_USER_AGENTS.len());
        assert!(pool.pick().contains("Mozilla"));
    }

    #[test]
    fn test_pick_from_configured() {
        let pool = UserAgentPool::new(&["MyBrowser/1.0".to_string()]);
        assert_eq!(pool.pick(), "MyBrowser/1.0");
    }
}
