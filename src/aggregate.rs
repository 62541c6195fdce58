use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Language name to translated text, as attached to a record.
pub type Translations = BTreeMap<String, String>;

/// Translations collected so far by one dispatch. Only successful calls are
/// ever inserted.
#[derive(Debug, Default)]
pub struct ResultAggregate {
    entries: Mutex<Translations>,
}

impl ResultAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, language: impl Into<String>, text: impl Into<String>) {
        self.lock().insert(language.into(), text.into());
    }

    pub fn snapshot(&self) -> Translations {
        self.lock().clone()
    }

    pub fn contains(&self, language: &str) -> bool {
        self.lock().contains_key(language)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // a panicking writer cannot leave a half-written entry, so poisoning is safe to ignore
    fn lock(&self) -> MutexGuard<'_, Translations> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn snapshot_does_not_alias_live_map() {
        let aggregate = ResultAggregate::new();
        aggregate.insert("french", "bonjour");
        let snapshot = aggregate.snapshot();
        aggregate.insert("german", "hallo");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(aggregate.len(), 2);
        assert!(aggregate.contains("german"));
    }

    #[test]
    fn last_writer_wins_per_language() {
        let aggregate = ResultAggregate::new();
        aggregate.insert("french", "salut");
        aggregate.insert("french", "bonjour");
        assert_eq!(aggregate.snapshot()["french"], "bonjour");
        assert_eq!(aggregate.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_are_not_lost() {
        let aggregate = Arc::new(ResultAggregate::new());
        let mut handles = Vec::new();
        for index in 0..64 {
            let aggregate = aggregate.clone();
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                aggregate.insert(format!("lang-{index}"), format!("text-{index}"));
                aggregate.snapshot().len()
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        assert_eq!(aggregate.len(), 64);
    }
}
