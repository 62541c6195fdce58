use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type TranslateFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Single-shot translation of one text into one language. Errors are treated
/// as transient by the dispatcher and retried.
pub trait TranslationClient: Send + Sync {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        requester_id: &'a str,
        language: &'a str,
    ) -> TranslateFuture<'a>;
}

impl<T: TranslationClient + ?Sized> TranslationClient for Arc<T> {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        requester_id: &'a str,
        language: &'a str,
    ) -> TranslateFuture<'a> {
        (**self).translate(text, requester_id, language)
    }
}
