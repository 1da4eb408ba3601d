//! Anti-bot detection markers.

use url::Url;

/// Body text Douban serves when it has flagged the client.
pub const DEFAULT_DETECTION_MARKERS: &[&str] = &[
    "检测到有异常请求",
    "有异常请求从你的 IP 发出",
    "sec.douban.com",
    "<title>禁止访问</title>",
];

/// Hosts that only serve challenge pages.
pub const DEFAULT_CHALLENGE_HOSTS: &[&str] = &["sec.douban.com"];

/// Detects block pages by body markers and challenge redirects.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    markers: Vec<String>,
    challenge_hosts: Vec<String>,
}

impl BlockDetector {
    pub fn new(markers: Vec<String>, challenge_hosts: Vec<String>) -> Self {
        Self {
            markers,
            challenge_hosts,
        }
    }

    /// Return the marker that identifies `body` (or its final URL) as a block page.
    pub fn detect(&self, final_url: Option<&str>, body: &str) -> Option<String> {
        if let Some(host) = final_url
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| u.host_str().map(|h| h.to_string()))
        {
            if let Some(challenge) = self.challenge_hosts.iter().find(|h| **h == host) {
                return Some(challenge.clone());
            }
        }

        self.markers
            .iter()
            .find(|marker| !marker.is_empty() && body.contains(marker.as_str()))
            .cloned()
    }
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new(
            DEFAULT_DETECTION_MARKERS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_CHALLENGE_HOSTS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

/// Whether a 2xx body is too thin to be a real page.
pub fn is_placeholder(body: &str) -> bool {
    body.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_marker_in_body() {
        let detector = BlockDetector::default();
        let body = "<html><body>检测到有异常请求从你的 IP 发出</body></html>";
        assert_eq!(
            detector.detect(None, body).as_deref(),
            Some("检测到有异常请求")
        );
    }

    #[test]
    fn test_detects_challenge_redirect() {
        let detector = BlockDetector::default();
        assert_eq!(
            detector
                .detect(Some("https://sec.douban.com/b?r=https%3A%2F%2Fmovie"), "<html></html>")
                .as_deref(),
            Some("sec.douban.com")
        );
    }

    #[test]
    fn test_clean_page_passes() {
        let detector = BlockDetector::default();
        assert!(detector
            .detect(
                Some("https://movie.douban.com/subject/1/"),
                "<html><div id=\"content\"></div></html>"
            )
            .is_none());
    }
}
