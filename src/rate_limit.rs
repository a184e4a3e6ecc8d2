//! Sliding-window rate limiter (spec §4.7), driven by the middleware layer
//! in `api/middleware.rs`.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub enum RateLimitResult {
    Allowed { remaining: u32, reset_after: Duration },
    Limited { retry_after: Duration },
}

/// Sliding-window limiter keyed by an arbitrary client id string.
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Vec<Instant>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Remove timestamps older than the window, then either reject (if at
    /// capacity) or record this request and allow it.
    pub async fn check_and_record(&self, key: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let entries = windows.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < self.window);

        if entries.len() as u32 >= self.max_requests {
            let oldest = entries.first().copied().unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return RateLimitResult::Limited { retry_after };
        }

        entries.push(now);
        let oldest = entries.first().copied().unwrap_or(now);
        RateLimitResult::Allowed {
            remaining: self.max_requests - entries.len() as u32,
            reset_after: self.window.saturating_sub(now.duration_since(oldest)),
        }
    }

    /// Periodic reaper: discard keys with no recent activity (spec §4.7).
    pub async fn reap_empty(&self) {
        let now = Instant::now();
        let window = self.window;
        let mut windows = self.windows.write().await;
        windows.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < window);
            !entries.is_empty()
        });
    }

    pub fn spawn_reaper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                self.reap_empty().await;
            }
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

/// Paths that never consume a rate limit bucket.
pub fn is_exempt_path(path: &str) -> bool {
    matches!(path, "/health" | "/healthz" | "/metrics" | "/" | "/ready")
}

/// Derive the client id used as the rate limit key: first `X-Forwarded-For`
/// hop, else `X-Real-IP`, else `"unknown"`; optionally sharpened with the
/// first 8 bytes of a bearer token to tell apart clients behind shared NAT.
pub fn client_id(forwarded_for: Option<&str>, real_ip: Option<&str>, bearer_token: Option<&str>) -> String {
    let ip = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| real_ip.map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    match bearer_token {
        Some(token) if token.len() >= 8 => format!("{ip}:{}", &token[..8]),
        Some(token) => format!("{ip}:{token}"),
        None => ip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_requests_under_the_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(matches!(limiter.check_and_record("client-1").await, RateLimitResult::Allowed { .. }));
        }
    }

    #[tokio::test]
    async fn rejects_the_request_over_the_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.check_and_record("client-1").await;
        limiter.check_and_record("client-1").await;
        assert!(matches!(limiter.check_and_record("client-1").await, RateLimitResult::Limited { .. }));
    }

    #[tokio::test]
    async fn separate_keys_have_independent_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(matches!(limiter.check_and_record("a").await, RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check_and_record("b").await, RateLimitResult::Allowed { .. }));
    }

    #[test]
    fn client_id_prefers_forwarded_for_then_real_ip_then_unknown() {
        assert_eq!(client_id(Some("1.2.3.4, 5.6.7.8"), None, None), "1.2.3.4");
        assert_eq!(client_id(None, Some("9.9.9.9"), None), "9.9.9.9");
        assert_eq!(client_id(None, None, None), "unknown");
    }

    #[test]
    fn client_id_incorporates_token_prefix() {
        assert_eq!(client_id(None, Some("9.9.9.9"), Some("rgy_abcdefgh12345")), "9.9.9.9:rgy_abcd");
    }

    #[test]
    fn exempt_paths_skip_the_limiter() {
        assert!(is_exempt_path("/health"));
        assert!(is_exempt_path("/metrics"));
        assert!(!is_exempt_path("/api/packages/alpha"));
    }
}
</content>
