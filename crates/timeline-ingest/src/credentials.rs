//! Pool of interchangeable access credentials.
//!
//! Upstream APIs enforce per-credential quotas, so the number of credentials
//! determines how fast collection may go. With no credentials at all the
//! scheduler still runs, at one task start per second.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::scheduler::SchedulerConfig;
use timeline_core::MAX_CONCURRENT_TASKS;

/// An opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the transport to put on the wire.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Ordered set of credentials with a round-robin cursor.
#[derive(Debug, Default)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Parse a comma-separated token list. Blank entries are dropped.
    pub fn parse(tokens: &str) -> Self {
        let credentials = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Credential::new)
            .collect();
        Self::new(credentials)
    }

    pub fn count(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Task starts allowed per second: one per credential, at least one.
    pub fn max_submissions_per_second(&self) -> usize {
        self.count().max(1)
    }

    /// Next credential in round-robin order, or `None` for an empty pool.
    pub fn next(&self) -> Option<Credential> {
        if self.credentials.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.credentials.len();
        Some(self.credentials[i].clone())
    }

    /// Scheduler limits derived from this pool.
    pub fn scheduler_config(&self, cancel: CancellationToken) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: MAX_CONCURRENT_TASKS,
            max_submissions_per_second: self.max_submissions_per_second(),
            cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drops_blanks() {
        let pool = CredentialPool::parse(" a, b,,c ,");
        assert_eq!(pool.count(), 3);
        assert_eq!(pool.next().unwrap().expose(), "a");
    }

    #[test]
    fn test_rate_follows_credential_count() {
        assert_eq!(CredentialPool::parse("").max_submissions_per_second(), 1);
        assert_eq!(CredentialPool::parse("a").max_submissions_per_second(), 1);
        assert_eq!(CredentialPool::parse("a,b,c").max_submissions_per_second(), 3);
    }

    #[test]
    fn test_next_round_robin() {
        let pool = CredentialPool::parse("a,b");
        let seen: Vec<_> = (0..4)
            .map(|_| pool.next().unwrap().expose().to_string())
            .collect();
        assert_eq!(seen, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_next_on_empty_pool() {
        let pool = CredentialPool::default();
        assert!(pool.is_empty());
        assert!(pool.next().is_none());
    }

    #[test]
    fn test_scheduler_config() {
        let pool = CredentialPool::parse("a,b");
        let config = pool.scheduler_config(CancellationToken::new());
        assert_eq!(config.max_concurrent, 50);
        assert_eq!(config.max_submissions_per_second, 2);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let pool = CredentialPool::parse("secret-token");
        let debug = format!("{:?}", pool);
        assert!(!debug.contains("secret-token"));
    }
}
