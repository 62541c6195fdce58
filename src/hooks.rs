use std::sync::Arc;
use tracing::debug;

use crate::channels::ChannelSettings;
use crate::client::TranslationClient;
use crate::dispatcher::{DispatchOutcome, Dispatcher, TranslationRequest};
use crate::record::{Record, PENDING_TRANSLATION_KIND};
use crate::settings::Settings;
use crate::store::RecordStore;

/// Message lifecycle entry points: decide whether a posted message gets
/// translated and, if so, run the dispatch for it.
#[derive(Debug)]
pub struct TranslationHooks<C, S, Ch: ?Sized> {
    settings: Settings,
    channels: Arc<Ch>,
    dispatcher: Dispatcher<C, S>,
}

impl<C, S, Ch> TranslationHooks<C, S, Ch>
where
    C: TranslationClient + 'static,
    S: RecordStore + 'static,
    Ch: ChannelSettings + ?Sized,
{
    pub fn new(settings: Settings, channels: Arc<Ch>, dispatcher: Dispatcher<C, S>) -> Self {
        Self {
            settings,
            channels,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<C, S> {
        &self.dispatcher
    }

    /// Runs before the message is stored. Eligible messages are marked so
    /// clients can show that translations are on their way.
    pub fn will_be_posted(&self, record: &Record) -> Record {
        let mut record = record.clone();
        if self.is_eligible(&record) {
            record.kind = PENDING_TRANSLATION_KIND.to_string();
        }
        record
    }

    /// Runs after the message is stored. Returns `None` when the message is
    /// not eligible for translation.
    pub async fn has_been_posted(&self, record: &Record) -> Option<DispatchOutcome> {
        if !self.is_eligible(record) {
            return None;
        }
        let request = TranslationRequest {
            record_id: record.id.clone(),
            source_text: record.message.clone(),
            languages: self.settings.target_languages(),
            requester_id: record.user_id.clone(),
        };
        Some(self.dispatcher.dispatch(request).await)
    }

    fn is_eligible(&self, record: &Record) -> bool {
        if !self.settings.translations_enabled {
            return false;
        }
        if record.message.is_empty() {
            return false;
        }
        if record.is_translated() {
            debug!("record {} already translated", record.id);
            return false;
        }
        match self.channels.is_enabled(&record.channel_id) {
            Ok(enabled) => enabled,
            Err(err) => {
                debug!(
                    "failed to check channel translation status for {}: {:#}",
                    record.channel_id, err
                );
                false
            }
        }
    }
}
