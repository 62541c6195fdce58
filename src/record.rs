use serde::{Deserialize, Serialize};

use crate::aggregate::Translations;

/// Kind given to a message while its translations are being produced.
pub const PENDING_TRANSLATION_KIND: &str = "custom_translation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub props: RecordProps,
}

/// What a reader should see for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayText<'a> {
    Translated { language: &'a str, text: &'a str },
    /// Marked for translation and nothing matching has landed yet.
    Pending,
    Original { text: &'a str },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translations: Option<Translations>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            message: message.into(),
            kind: String::new(),
            props: RecordProps::default(),
        }
    }

    pub fn is_translated(&self) -> bool {
        self.props.translations.is_some()
    }

    pub fn translations(&self) -> Option<&Translations> {
        self.props.translations.as_ref()
    }

    pub fn is_pending_translation(&self) -> bool {
        self.kind == PENDING_TRANSLATION_KIND
    }

    /// Picks the translation for the reader's preferred language, then for
    /// their locale. Blank keys are skipped.
    pub fn display_text<'a>(
        &'a self,
        preference: Option<&str>,
        locale: Option<&str>,
    ) -> DisplayText<'a> {
        if let Some(translations) = self.translations() {
            let found = [preference, locale]
                .into_iter()
                .flatten()
                .map(str::trim)
                .filter(|language| !language.is_empty())
                .find_map(|language| translations.get_key_value(language));
            if let Some((language, text)) = found {
                return DisplayText::Translated {
                    language: language.as_str(),
                    text: text.as_str(),
                };
            }
        }
        if self.is_pending_translation() {
            DisplayText::Pending
        } else {
            DisplayText::Original {
                text: &self.message,
            }
        }
    }
}
