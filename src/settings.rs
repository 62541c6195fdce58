use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::DispatchConfig;
use crate::languages;
use crate::limiter::DEFAULT_CONCURRENCY;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const HOME_DIR_NAME: &str = ".chat-translate";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub translations_enabled: bool,
    pub languages: Option<String>,
    pub concurrency: usize,
    pub max_attempts: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// `None` lets a single translation call run indefinitely.
    pub attempt_timeout: Option<Duration>,
    pub provider: ProviderSettings,
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            translations_enabled: false,
            languages: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::ZERO,
            backoff_max: DEFAULT_MAX_DELAY,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            provider: ProviderSettings::default(),
            store_dir: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    translations: Option<TranslationSection>,
    dispatch: Option<DispatchSection>,
    provider: Option<ProviderSection>,
    store: Option<StoreSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSection {
    enabled: Option<bool>,
    languages: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchSection {
    concurrency: Option<usize>,
    max_attempts: Option<usize>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    attempt_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSection {
    base_url: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreSection {
    dir: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_toml(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    /// Configured target languages, or the built-in default when unset.
    pub fn target_languages(&self) -> Vec<String> {
        languages::resolve_languages(self.languages.as_deref())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            concurrency: self.concurrency,
            retry: RetryPolicy::immediate(self.max_attempts)
                .with_backoff(self.backoff_base, self.backoff_max)
                .with_attempt_timeout(self.attempt_timeout),
        }
    }

    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.store_dir {
            return Ok(dir.clone());
        }
        home_dir()
            .map(|home| home.join("store"))
            .ok_or_else(|| anyhow!("HOME is not set; configure [store] dir"))
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(translations) = incoming.translations {
            if let Some(enabled) = translations.enabled {
                self.translations_enabled = enabled;
            }
            if let Some(languages) = translations.languages {
                self.languages = if languages.trim().is_empty() {
                    None
                } else {
                    Some(languages)
                };
            }
        }
        if let Some(dispatch) = incoming.dispatch {
            if let Some(concurrency) = dispatch.concurrency {
                if concurrency > 0 {
                    self.concurrency = concurrency;
                }
            }
            if let Some(max_attempts) = dispatch.max_attempts {
                if max_attempts > 0 {
                    self.max_attempts = max_attempts;
                }
            }
            if let Some(ms) = dispatch.backoff_base_ms {
                self.backoff_base = Duration::from_millis(ms);
            }
            if let Some(ms) = dispatch.backoff_max_ms {
                self.backoff_max = Duration::from_millis(ms);
            }
            if let Some(ms) = dispatch.attempt_timeout_ms {
                // 0 turns the limit off
                self.attempt_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
        }
        if let Some(provider) = incoming.provider {
            if let Some(url) = provider.base_url {
                if !url.trim().is_empty() {
                    self.provider.base_url = Some(url);
                }
            }
            if let Some(model) = provider.model {
                if !model.trim().is_empty() {
                    self.provider.model = Some(model);
                }
            }
            if let Some(env) = provider.api_key_env {
                if !env.trim().is_empty() {
                    self.provider.api_key_env = env;
                }
            }
        }
        if let Some(store) = incoming.store {
            if let Some(dir) = store.dir {
                if !dir.trim().is_empty() {
                    self.store_dir = Some(PathBuf::from(dir));
                }
            }
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(HOME_DIR_NAME))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn bundled_settings_match_defaults() {
        let mut settings = Settings::default();
        settings.merge_toml(DEFAULT_SETTINGS_TOML).expect("parse");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.target_languages(), vec!["english"]);
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let mut settings = Settings::default();
        settings
            .merge_toml(
                r#"
                [translations]
                enabled = true
                languages = "french,spanish"

                [dispatch]
                concurrency = 5
                "#,
            )
            .expect("first");
        settings
            .merge_toml(
                r#"
                [translations]
                languages = "german"

                [dispatch]
                concurrency = 0
                max_attempts = 4
                backoff_base_ms = 250
                "#,
            )
            .expect("second");

        assert!(settings.translations_enabled);
        assert_eq!(settings.target_languages(), vec!["german"]);
        let config = settings.dispatch_config();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, DEFAULT_MAX_DELAY);
    }

    #[test]
    fn attempt_timeout_can_be_changed_or_disabled() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.dispatch_config().retry.attempt_timeout,
            Some(DEFAULT_ATTEMPT_TIMEOUT)
        );

        settings
            .merge_toml("[dispatch]\nattempt_timeout_ms = 1500\n")
            .expect("set");
        assert_eq!(
            settings.dispatch_config().retry.attempt_timeout,
            Some(Duration::from_millis(1500))
        );

        settings
            .merge_toml("[dispatch]\nattempt_timeout_ms = 0\n")
            .expect("disable");
        assert_eq!(settings.dispatch_config().retry.attempt_timeout, None);
    }

    #[test]
    fn invalid_toml_is_reported() {
        let mut settings = Settings::default();
        assert!(settings.merge_toml("[dispatch]\nconcurrency = \"many\"").is_err());
    }

    #[test]
    fn load_writes_home_defaults_and_reads_extra_file() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            fs::write(
                &extra,
                "[translations]\nenabled = true\n[store]\ndir = \"/tmp/records\"\n",
            )
            .expect("write extra");

            let settings = load_settings(Some(&extra)).expect("load");
            assert!(settings.translations_enabled);
            assert_eq!(
                settings.store_dir().expect("store dir"),
                PathBuf::from("/tmp/records")
            );
            assert!(home.join(HOME_DIR_NAME).join("settings.toml").exists());
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(&home.join("nope.toml"))).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));
        });
    }

    #[test]
    fn store_dir_defaults_under_home() {
        with_temp_home(|home| {
            let settings = Settings::default();
            assert_eq!(
                settings.store_dir().expect("store dir"),
                home.join(HOME_DIR_NAME).join("store")
            );
        });
    }
}
