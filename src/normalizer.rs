use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{info, trace};

use crate::cache::{CacheStats, NormalizationCache};
use crate::suffix::{SuffixList, registrable_domain};

/// Reduces raw question names to their registrable domain, memoized.
///
/// The result depends on the raw string only, so concurrent callers racing on
/// the same miss compute the same value and the second insert is a refresh.
pub struct DomainNormalizer {
    cache: NormalizationCache,
    suffixes: Arc<dyn SuffixList>,
}

impl DomainNormalizer {
    pub fn new(suffixes: Arc<dyn SuffixList>, cache_capacity: NonZeroUsize) -> Self {
        Self {
            cache: NormalizationCache::new(cache_capacity),
            suffixes,
        }
    }

    /// Registrable domain of `raw`, lowercased, or `""` when there is none.
    pub fn normalize(&self, raw: &str) -> String {
        if let Some(hit) = self.cache.get(raw) {
            return hit;
        }

        let normalized = match registrable_domain(self.suffixes.as_ref(), raw) {
            Ok(domain) => domain.to_lowercase(),
            Err(err) => {
                // once per raw name while the negative entry stays cached
                info!(raw_domain = %raw, error = %err, "no registrable domain");
                String::new()
            }
        };

        if let Some((evicted, _)) = self.cache.insert(raw.to_string(), normalized.clone()) {
            trace!(evicted = %evicted, "normalization cache eviction");
        }
        normalized
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &NormalizationCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suffix::PublicSuffixList;

    fn normalizer(capacity: usize) -> DomainNormalizer {
        let psl = PublicSuffixList::bundled().expect("bundled list");
        DomainNormalizer::new(Arc::new(psl), NonZeroUsize::new(capacity).expect("non-zero"))
    }

    #[test]
    fn reduces_to_registrable_domain() {
        let n = normalizer(16);
        assert_eq!(n.normalize("subdomain.testingcom.au"), "testingcom.au");
        assert_eq!(n.normalize("subdomain.testingcom.co.uk"), "testingcom.co.uk");
        assert_eq!(n.normalize("fAcebOok.com"), "facebook.com");
        assert_eq!(n.normalize("WWW.Example.COM."), "example.com");
    }

    #[test]
    fn unparseable_input_yields_empty_string() {
        let n = normalizer(16);
        assert_eq!(n.normalize("localhost"), "");
        assert_eq!(n.normalize(""), "");
        assert_eq!(n.normalize("co.uk"), "");
        // the negative result is cached too
        assert_eq!(n.cache().get("localhost").as_deref(), Some(""));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failure_is_logged_at_info_once_per_raw_name() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let n = normalizer(16);
            assert_eq!(n.normalize("localhost"), "");
            assert_eq!(n.normalize("localhost"), "");
            assert_eq!(n.normalize("example.com"), "example.com");
        });

        let output = String::from_utf8(logs.0.lock().clone()).expect("utf8 logs");
        assert_eq!(output.matches("no registrable domain").count(), 1);
        assert!(output.contains("localhost"));
    }

    #[test]
    fn cold_miss_then_warm_hit_agree() {
        let n = normalizer(16);
        let cold = n.normalize("Mail.Google.com");
        let warm = n.normalize("Mail.Google.com");
        assert_eq!(cold, "google.com");
        assert_eq!(cold, warm);

        let stats = n.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn raw_case_variants_are_distinct_keys() {
        let n = normalizer(16);
        assert_eq!(n.normalize("Apple.com"), "apple.com");
        assert_eq!(n.normalize("apple.com"), "apple.com");
        assert_eq!(n.cache_stats().entries, 2);
    }

    #[test]
    fn concurrent_callers_keep_cache_consistent() {
        let n = Arc::new(normalizer(4096));
        let shared: Vec<String> = (0..64).map(|i| format!("shared{i}.example.co.uk")).collect();

        for _round in 0..20 {
            let handles: Vec<_> = (0..8)
                .map(|worker| {
                    let n = Arc::clone(&n);
                    let shared = shared.clone();
                    std::thread::spawn(move || {
                        for (i, raw) in shared.iter().enumerate() {
                            assert_eq!(n.normalize(raw), "example.co.uk");
                            let own = format!("w{worker}-{i}.testingcom.au");
                            assert_eq!(n.normalize(&own), "testingcom.au");
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("worker panicked");
            }
        }

        // 64 shared keys + 8 workers * 64 disjoint keys, none lost or duplicated
        let cache = n.cache();
        assert_eq!(cache.len(), 64 + 8 * 64);
        for raw in &shared {
            assert!(cache.contains_key(raw));
        }
        for worker in 0..8 {
            for i in 0..64 {
                assert!(cache.contains_key(&format!("w{worker}-{i}.testingcom.au")));
            }
        }
        assert_eq!(n.cache_stats().evictions, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn blocking_capture_tasks_share_one_cache() {
        let n = Arc::new(normalizer(1024));
        let tasks = (0..16).map(|task| {
            let n = Arc::clone(&n);
            tokio::task::spawn_blocking(move || {
                (0..32)
                    .map(|i| n.normalize(&format!("q{}.Shared{}.CO.UK", task, i % 8)))
                    .collect::<Vec<_>>()
            })
        });
        let results = futures::future::join_all(tasks).await;

        for (task, result) in results.into_iter().enumerate() {
            let domains = result.expect("task panicked");
            for (i, domain) in domains.iter().enumerate() {
                assert_eq!(domain, &format!("shared{}.co.uk", i % 8), "task {task}");
            }
        }
        // 16 tasks * 8 distinct raw names each
        assert_eq!(n.cache().len(), 128);
    }

    #[test]
    fn concurrent_callers_respect_capacity_under_pressure() {
        let n = Arc::new(normalizer(32));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let n = Arc::clone(&n);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        n.normalize(&format!("r{worker}x{i}.flood.com"));
                        n.normalize("hot.example.com");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert!(n.cache().len() <= 32);
        assert_eq!(n.normalize("hot.example.com"), "example.com");
    }
}
