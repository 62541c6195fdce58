use anyhow::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregate::{ResultAggregate, Translations};
use crate::cancel::CancelSignal;
use crate::client::TranslationClient;
use crate::languages::normalize_languages;
use crate::limiter::{ConcurrencyLimiter, DEFAULT_CONCURRENCY};
use crate::retry::{retry_bounded, RetryPolicy};
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub record_id: String,
    pub source_text: String,
    /// Duplicates are translated independently; the last success wins.
    pub languages: Vec<String>,
    pub requester_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub final_entries: Translations,
    pub failed_languages: BTreeSet<String>,
    /// Attempts used per language, summed over duplicate requests.
    pub attempts: BTreeMap<String, usize>,
    /// Set when the final publish could not be stored. The entries above are
    /// still complete.
    pub publish_error: Option<Error>,
}

impl DispatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_languages.is_empty() && self.publish_error.is_none()
    }
}

#[derive(Debug)]
struct WorkerReport {
    language: String,
    attempts: usize,
}

/// Fans one message out to every requested language under a concurrency cap
/// and keeps the record's translation payload up to date as results land.
#[derive(Debug)]
pub struct Dispatcher<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    config: DispatchConfig,
}

impl<C, S> Clone for Dispatcher<C, S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            store: self.store.clone(),
            config: self.config,
        }
    }
}

impl<C, S> Dispatcher<C, S>
where
    C: TranslationClient + 'static,
    S: RecordStore + 'static,
{
    pub fn new(client: Arc<C>, store: Arc<S>, config: DispatchConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn dispatch(&self, request: TranslationRequest) -> DispatchOutcome {
        self.dispatch_with_cancel(request, None).await
    }

    /// Never fails: languages that exhaust their retries are reported in
    /// `failed_languages`, and a failed final save in `publish_error`.
    ///
    /// # Panics
    ///
    /// Panics when the request has an empty record id.
    pub async fn dispatch_with_cancel(
        &self,
        request: TranslationRequest,
        cancel: Option<CancelSignal>,
    ) -> DispatchOutcome {
        assert!(
            !request.record_id.is_empty(),
            "translation request without a record id"
        );

        let TranslationRequest {
            record_id,
            source_text,
            languages,
            requester_id,
        } = request;
        let languages = normalize_languages(languages);
        let record_id: Arc<str> = record_id.into();
        let source_text: Arc<str> = source_text.into();
        let requester_id: Arc<str> = requester_id.into();

        info!(
            "dispatching record {} to {} language(s)",
            record_id,
            languages.len()
        );

        let aggregate = Arc::new(ResultAggregate::new());
        let limiter = ConcurrencyLimiter::new(self.config.concurrency);
        let mut workers = JoinSet::new();

        for language in &languages {
            let slot = match limiter.acquire().await {
                Ok(slot) => slot,
                Err(err) => {
                    error!("could not schedule {}: {:#}", language, err);
                    continue;
                }
            };
            let worker = Worker {
                client: self.client.clone(),
                store: self.store.clone(),
                aggregate: aggregate.clone(),
                policy: self.config.retry,
                cancel: cancel.clone(),
                record_id: record_id.clone(),
                source_text: source_text.clone(),
                requester_id: requester_id.clone(),
                language: language.clone(),
            };
            workers.spawn(async move {
                let _slot = slot;
                worker.run().await
            });
        }

        let mut attempts: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => *attempts.entry(report.language).or_default() += report.attempts,
                Err(err) => error!("translation worker for record {} died: {}", record_id, err),
            }
        }

        let final_entries = aggregate.snapshot();
        let publish_error = publish_final(&*self.store, &record_id, &final_entries)
            .await
            .err();

        let failed_languages: BTreeSet<String> = languages
            .into_iter()
            .filter(|language| !final_entries.contains_key(language))
            .collect();
        if !failed_languages.is_empty() {
            warn!(
                "record {}: no translation for {}",
                record_id,
                failed_languages
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        DispatchOutcome {
            final_entries,
            failed_languages,
            attempts,
            publish_error,
        }
    }
}

struct Worker<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    aggregate: Arc<ResultAggregate>,
    policy: RetryPolicy,
    cancel: Option<CancelSignal>,
    record_id: Arc<str>,
    source_text: Arc<str>,
    requester_id: Arc<str>,
    language: String,
}

impl<C: TranslationClient, S: RecordStore> Worker<C, S> {
    async fn run(self) -> WorkerReport {
        let label = format!("translation to {}", self.language);
        let outcome = retry_bounded(&label, &self.policy, self.cancel.as_ref(), |_| {
            self.client
                .translate(&self.source_text, &self.requester_id, &self.language)
        })
        .await;

        match outcome.result {
            Ok(text) => {
                debug!(
                    "translated record {} to {} after {} attempt(s)",
                    self.record_id, self.language, outcome.attempts
                );
                self.aggregate.insert(self.language.clone(), text);
                let snapshot = self.aggregate.snapshot();
                publish_incremental(&*self.store, &self.record_id, &snapshot).await;
            }
            Err(err) => {
                warn!("record {}: {:#}", self.record_id, err);
            }
        }

        WorkerReport {
            language: self.language,
            attempts: outcome.attempts,
        }
    }
}

// Best effort: a later publish, at worst the final one, carries the entries.
async fn publish_incremental<S: RecordStore + ?Sized>(
    store: &S,
    record_id: &str,
    snapshot: &Translations,
) {
    if let Err(err) = store.save(record_id, snapshot).await {
        warn!(
            "incremental save of record {} failed: {:#}",
            record_id, err
        );
    }
}

async fn publish_final<S: RecordStore + ?Sized>(
    store: &S,
    record_id: &str,
    entries: &Translations,
) -> Result<()> {
    store.save(record_id, entries).await.map_err(|err| {
        error!("final save of record {} failed: {:#}", record_id, err);
        err.context(format!("failed to store translations for record {}", record_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TranslateFuture;
    use crate::record::Record;
    use crate::store::MemoryRecordStore;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedClient {
        failing: Vec<String>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedClient {
        fn failing(languages: &[&str]) -> Self {
            Self {
                failing: languages.iter().map(|lang| lang.to_string()).collect(),
                ..Self::default()
            }
        }

        fn calls_for(&self, language: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .get(language)
                .copied()
                .unwrap_or(0)
        }
    }

    impl TranslationClient for ScriptedClient {
        fn translate<'a>(
            &'a self,
            text: &'a str,
            _requester_id: &'a str,
            language: &'a str,
        ) -> TranslateFuture<'a> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(language.to_string())
                .or_default() += 1;
            let fail = self.failing.iter().any(|lang| lang == language);
            Box::pin(async move {
                if fail {
                    Err(anyhow!("{} backend unavailable", language))
                } else {
                    Ok(format!("[{}] {}", language, text))
                }
            })
        }
    }

    fn request(languages: &[&str]) -> TranslationRequest {
        TranslationRequest {
            record_id: "post1".to_string(),
            source_text: "hello".to_string(),
            languages: languages.iter().map(|lang| lang.to_string()).collect(),
            requester_id: "user1".to_string(),
        }
    }

    fn store_with_record() -> Arc<MemoryRecordStore> {
        let store = MemoryRecordStore::new();
        store.insert(Record::new("post1", "town-square", "user1", "hello"));
        Arc::new(store)
    }

    #[tokio::test]
    async fn failing_language_lands_in_failed_set() {
        let client = Arc::new(ScriptedClient::failing(&["spanish"]));
        let store = store_with_record();
        let dispatcher = Dispatcher::new(client.clone(), store.clone(), DispatchConfig::default());

        let outcome = dispatcher
            .dispatch(request(&["french", "spanish", "german"]))
            .await;

        assert_eq!(
            outcome.final_entries.keys().collect::<Vec<_>>(),
            vec!["french", "german"]
        );
        assert_eq!(outcome.final_entries["french"], "[french] hello");
        assert_eq!(
            outcome.failed_languages,
            BTreeSet::from(["spanish".to_string()])
        );
        assert_eq!(client.calls_for("spanish"), 10);
        assert_eq!(client.calls_for("french"), 1);
        assert_eq!(outcome.attempts["spanish"], 10);
        assert!(outcome.publish_error.is_none());
        assert!(!outcome.is_complete());

        // two incremental publishes plus the final one
        assert_eq!(store.save_count(), 3);
        let record = store.get("post1").expect("record");
        assert_eq!(record.translations(), Some(&outcome.final_entries));
    }

    #[tokio::test]
    async fn empty_language_list_still_publishes_once() {
        let client = Arc::new(ScriptedClient::default());
        let store = store_with_record();
        let dispatcher = Dispatcher::new(client.clone(), store.clone(), DispatchConfig::default());

        let outcome = dispatcher.dispatch(request(&[" ", ""])).await;

        assert!(outcome.final_entries.is_empty());
        assert!(outcome.failed_languages.is_empty());
        assert!(client.calls.lock().unwrap().is_empty());
        assert_eq!(store.save_count(), 1);
        assert_eq!(
            store.get("post1").expect("record").translations(),
            Some(&Translations::new())
        );
    }

    #[tokio::test]
    async fn duplicates_are_translated_independently() {
        let client = Arc::new(ScriptedClient::default());
        let store = store_with_record();
        let dispatcher = Dispatcher::new(client.clone(), store, DispatchConfig::default());

        let outcome = dispatcher.dispatch(request(&["french", "french"])).await;

        assert_eq!(outcome.final_entries.len(), 1);
        assert_eq!(client.calls_for("french"), 2);
        assert_eq!(outcome.attempts["french"], 2);
    }

    #[tokio::test]
    async fn all_failures_publish_exactly_once() {
        let client = Arc::new(ScriptedClient::failing(&["french", "german"]));
        let store = store_with_record();
        let config = DispatchConfig {
            retry: RetryPolicy::immediate(3),
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(client.clone(), store.clone(), config);

        let outcome = dispatcher.dispatch(request(&["french", "german"])).await;

        assert!(outcome.final_entries.is_empty());
        assert_eq!(outcome.failed_languages.len(), 2);
        assert_eq!(client.calls_for("german"), 3);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn final_publish_failure_is_reported_not_raised() {
        let client = Arc::new(ScriptedClient::default());
        // no record inserted, so every save fails
        let store = Arc::new(MemoryRecordStore::new());
        let dispatcher = Dispatcher::new(client, store.clone(), DispatchConfig::default());

        let outcome = dispatcher.dispatch(request(&["french", "german"])).await;

        assert_eq!(outcome.final_entries.len(), 2);
        assert!(outcome.failed_languages.is_empty());
        let err = outcome.publish_error.expect("publish error");
        assert!(format!("{:#}", err).contains("record not found"));
        assert_eq!(store.save_count(), 3);
    }

    #[tokio::test]
    async fn cancelled_dispatch_makes_no_calls() {
        let client = Arc::new(ScriptedClient::default());
        let store = store_with_record();
        let dispatcher = Dispatcher::new(client.clone(), store.clone(), DispatchConfig::default());
        let cancel = CancelSignal::new();
        cancel.cancel();

        let outcome = dispatcher
            .dispatch_with_cancel(request(&["french", "german"]), Some(cancel))
            .await;

        assert!(client.calls.lock().unwrap().is_empty());
        assert_eq!(outcome.failed_languages.len(), 2);
        assert_eq!(outcome.attempts["french"], 0);
        assert_eq!(store.save_count(), 1);
    }

    struct PanickingClient {
        calls: AtomicUsize,
    }

    impl TranslationClient for PanickingClient {
        fn translate<'a>(
            &'a self,
            text: &'a str,
            _requester_id: &'a str,
            language: &'a str,
        ) -> TranslateFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if language == "klingon" {
                    panic!("unsupported language");
                }
                Ok(format!("{}:{}", language, text))
            })
        }
    }

    #[tokio::test]
    async fn panicking_worker_does_not_sink_siblings() {
        let client = Arc::new(PanickingClient {
            calls: AtomicUsize::new(0),
        });
        let store = store_with_record();
        let config = DispatchConfig {
            concurrency: 1,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(client.clone(), store.clone(), config);

        let outcome = dispatcher
            .dispatch(request(&["klingon", "french", "german"]))
            .await;

        assert_eq!(outcome.final_entries.len(), 2);
        assert_eq!(
            outcome.failed_languages,
            BTreeSet::from(["klingon".to_string()])
        );
        assert!(!outcome.attempts.contains_key("klingon"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    /// Never answers for german.
    struct HangingClient;

    impl TranslationClient for HangingClient {
        fn translate<'a>(
            &'a self,
            text: &'a str,
            _requester_id: &'a str,
            language: &'a str,
        ) -> TranslateFuture<'a> {
            Box::pin(async move {
                if language == "german" {
                    std::future::pending::<()>().await;
                }
                Ok(format!("[{}] {}", language, text))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_and_final_publish_runs() {
        let store = store_with_record();
        let config = DispatchConfig {
            retry: RetryPolicy::immediate(2)
                .with_attempt_timeout(Some(std::time::Duration::from_secs(30))),
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(HangingClient), store.clone(), config);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(300),
            dispatcher.dispatch(request(&["french", "german"])),
        )
        .await
        .expect("dispatch finished");

        assert_eq!(
            outcome.failed_languages,
            BTreeSet::from(["german".to_string()])
        );
        assert_eq!(outcome.attempts["german"], 2);
        // french incremental plus the final one
        assert_eq!(store.save_count(), 2);
        assert_eq!(
            store.get("post1").expect("record").translations(),
            Some(&outcome.final_entries)
        );
    }

    #[tokio::test]
    #[should_panic(expected = "without a record id")]
    async fn missing_record_id_fails_fast() {
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedClient::default()),
            store_with_record(),
            DispatchConfig::default(),
        );
        let mut request = request(&["french"]);
        request.record_id.clear();
        dispatcher.dispatch(request).await;
    }
}
