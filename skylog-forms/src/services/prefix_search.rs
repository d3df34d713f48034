//! Debounced, cancellable prefix search for registration autocomplete
//!
//! Every call supersedes the previous one: the earlier call's token is
//! cancelled and it resolves as [`SearchOutcome::Superseded`], whether it
//! was still waiting out the debounce interval or already querying.

use super::{LookupError, PrefixSearch};
use skylog_common::config::SearchSettings;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Result of one debounced search call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Completed(Vec<String>),
    /// A newer call replaced this one
    Superseded,
}

pub struct DebouncedSearch {
    service: Arc<dyn PrefixSearch>,
    settings: SearchSettings,
    current: Mutex<Option<CancellationToken>>,
}

impl DebouncedSearch {
    pub fn new(service: Arc<dyn PrefixSearch>, settings: SearchSettings) -> Self {
        Self {
            service,
            settings,
            current: Mutex::new(None),
        }
    }

    /// Search after the debounce interval unless superseded first
    ///
    /// Prefixes shorter than the configured minimum complete immediately
    /// with no candidates and no service call.
    pub async fn search(&self, prefix: &str) -> Result<SearchOutcome, LookupError> {
        let token = self.supersede();
        let prefix = prefix.trim();

        if prefix.chars().count() < self.settings.min_prefix {
            return Ok(SearchOutcome::Completed(Vec::new()));
        }

        tokio::select! {
            _ = token.cancelled() => return Ok(SearchOutcome::Superseded),
            _ = tokio::time::sleep(self.settings.debounce) => {}
        }

        let result = tokio::select! {
            _ = token.cancelled() => return Ok(SearchOutcome::Superseded),
            result = self.service.search(prefix, self.settings.limit) => result,
        };

        // Superseded while the response was in flight but after select resolved
        if token.is_cancelled() {
            return Ok(SearchOutcome::Superseded);
        }

        let mut keys = result?;
        keys.truncate(self.settings.limit);
        tracing::debug!(prefix = %prefix, results = keys.len(), "Prefix search completed");
        Ok(SearchOutcome::Completed(keys))
    }

    /// Cancel any unresolved search without starting a new one
    pub fn cancel(&self) {
        if let Some(token) = self.lock_current().take() {
            token.cancel();
        }
    }

    fn supersede(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock_current().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        // A poisoned lock only means another search panicked; the token slot is still valid
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DebouncedSearch {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSearch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PrefixSearch for CountingSearch {
        async fn search(&self, prefix: &str, limit: usize) -> Result<Vec<String>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..limit + 2).map(|i| format!("{}{}", prefix, i)).collect())
        }
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            debounce: Duration::from_millis(50),
            min_prefix: 2,
            limit: 3,
        }
    }

    #[tokio::test]
    async fn test_short_prefix_skips_service() {
        let service = Arc::new(CountingSearch { calls: AtomicUsize::new(0) });
        let search = DebouncedSearch::new(service.clone(), settings());

        assert_eq!(search.search("C").await.unwrap(), SearchOutcome::Completed(vec![]));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_results_truncated_to_limit() {
        let service = Arc::new(CountingSearch { calls: AtomicUsize::new(0) });
        let search = DebouncedSearch::new(service, settings());

        match search.search("C-F").await.unwrap() {
            SearchOutcome::Completed(keys) => assert_eq!(keys, vec!["C-F0", "C-F1", "C-F2"]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_newer_keystroke_supersedes() {
        let service = Arc::new(CountingSearch { calls: AtomicUsize::new(0) });
        let search = Arc::new(DebouncedSearch::new(service.clone(), settings()));

        let first = {
            let search = search.clone();
            tokio::spawn(async move { search.search("C-F").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = search.search("C-FA").await.unwrap();

        assert_eq!(first.await.unwrap().unwrap(), SearchOutcome::Superseded);
        assert!(matches!(second, SearchOutcome::Completed(_)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
