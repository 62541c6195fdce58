pub mod aggregate;
pub mod cancel;
pub mod channels;
pub mod client;
pub mod dispatcher;
pub mod hooks;
pub mod languages;
pub mod limiter;
pub mod logging;
pub mod preferences;
pub mod providers;
pub mod record;
pub mod retry;
pub mod settings;
pub mod store;
mod test_util;

pub use aggregate::{ResultAggregate, Translations};
pub use cancel::CancelSignal;
pub use channels::{ChannelSettings, FileChannelSettings, MemoryChannelSettings};
pub use client::{TranslateFuture, TranslationClient};
pub use dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher, TranslationRequest};
pub use hooks::TranslationHooks;
pub use limiter::ConcurrencyLimiter;
pub use preferences::{FileUserPreferences, MemoryUserPreferences, UserPreferences};
pub use providers::OpenAiClient;
pub use record::{DisplayText, Record, PENDING_TRANSLATION_KIND};
pub use retry::{retry_bounded, AttemptError, RetryOutcome, RetryPolicy};
pub use settings::Settings;
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore, StoreFuture};
