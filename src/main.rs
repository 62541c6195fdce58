use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chat_translate_fanout::languages::parse_language_list;
use chat_translate_fanout::{
    providers, settings, ChannelSettings, DispatchOutcome, Dispatcher, FileChannelSettings,
    FileRecordStore, FileUserPreferences, Record, Settings, TranslationHooks, TranslationRequest,
    UserPreferences,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(
    name = "chat-translate",
    version,
    about = "Translate chat messages into the configured languages"
)]
struct Cli {
    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings", global = true)]
    read_settings: Option<String>,

    /// API key (overrides the configured environment variable)
    #[arg(short = 'k', long = "key", global = true)]
    key: Option<String>,

    /// Log every attempt and save
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a new message and run the translation hooks for it
    Post(PostArgs),
    /// Translate a stored message, ignoring feature and channel switches
    Translate(TranslateArgs),
    /// Show or change whether a channel translates its messages
    Channel(ChannelArgs),
    /// Print a stored message as JSON, or as a given user would read it
    Show(ShowArgs),
    /// Show or change a user's preferred translation language
    User(UserArgs),
    /// List the configured target languages
    Languages(LanguagesArgs),
}

#[derive(Args, Debug)]
struct PostArgs {
    #[arg(short = 'c', long = "channel")]
    channel: String,

    #[arg(short = 'u', long = "user")]
    user: String,

    /// Record id (generated when omitted)
    #[arg(long = "id")]
    id: Option<String>,

    /// Message text (read from stdin when omitted)
    message: Option<String>,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    record_id: String,

    /// Comma separated languages (defaults to the configured list)
    #[arg(short = 'l', long = "languages")]
    languages: Option<String>,
}

#[derive(Args, Debug)]
struct ChannelArgs {
    channel_id: String,

    /// on/off (shows the current state when omitted)
    state: Option<String>,
}

#[derive(Args, Debug)]
struct ShowArgs {
    record_id: String,

    /// Pick the text this user would see
    #[arg(long = "as")]
    as_user: Option<String>,

    /// Reader locale, used when the user has no preference
    #[arg(long = "locale", requires = "as_user")]
    locale: Option<String>,
}

#[derive(Args, Debug)]
struct UserArgs {
    user_id: String,

    /// Preferred language (shows the current one when omitted)
    language: Option<String>,

    /// Forget the preference and fall back to the locale
    #[arg(long = "clear", conflicts_with = "language")]
    clear: bool,
}

#[derive(Args, Debug)]
struct LanguagesArgs {
    /// Also report this user's preference
    #[arg(short = 'u', long = "user")]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    chat_translate_fanout::logging::init(cli.verbose)?;

    let settings = settings::load_settings(cli.read_settings.as_deref().map(Path::new))?;
    let store_dir = settings.store_dir()?;
    let store = Arc::new(FileRecordStore::open(&store_dir)?);
    let channels = Arc::new(FileChannelSettings::open(&store_dir)?);
    let preferences = FileUserPreferences::open(&store_dir)?;

    match cli.command {
        Commands::Post(args) => {
            run_post(args, settings, store, channels, cli.key.as_deref()).await
        }
        Commands::Translate(args) => {
            run_translate(args, settings, store, cli.key.as_deref()).await
        }
        Commands::Channel(args) => run_channel(args, &*channels),
        Commands::Show(args) => run_show(args, &store, &preferences),
        Commands::User(args) => run_user(args, &preferences),
        Commands::Languages(args) => run_languages(args, &settings, &preferences),
    }
}

async fn run_post(
    args: PostArgs,
    settings: Settings,
    store: Arc<FileRecordStore>,
    channels: Arc<FileChannelSettings>,
    key: Option<&str>,
) -> Result<()> {
    let message = match args.message {
        Some(message) => message,
        None => read_stdin()?,
    };
    let message = message.trim().to_string();
    if message.is_empty() {
        return Err(anyhow!("message is empty"));
    }
    let id = args.id.unwrap_or_else(generate_record_id);
    let record = Record::new(id, args.channel, args.user, message);

    let client = Arc::new(providers::build_client(&settings.provider, key)?);
    let dispatcher = Dispatcher::new(client, store.clone(), settings.dispatch_config());
    let hooks = TranslationHooks::new(settings, channels, dispatcher);

    let record = hooks.will_be_posted(&record);
    store.put(&record)?;
    match hooks.has_been_posted(&record).await {
        Some(outcome) => print_outcome(&record.id, &outcome),
        None => {
            println!(
                "{}",
                json!({"record_id": record.id, "translated": false})
            );
            Ok(())
        }
    }
}

async fn run_translate(
    args: TranslateArgs,
    settings: Settings,
    store: Arc<FileRecordStore>,
    key: Option<&str>,
) -> Result<()> {
    let record = store
        .get(&args.record_id)?
        .ok_or_else(|| anyhow!("record not found: {}", args.record_id))?;
    if record.message.trim().is_empty() {
        return Err(anyhow!("record {} has no text", record.id));
    }
    let languages = requested_languages(args.languages.as_deref(), &settings)?;

    let client = Arc::new(providers::build_client(&settings.provider, key)?);
    let dispatcher = Dispatcher::new(client, store, settings.dispatch_config());
    let outcome = dispatcher
        .dispatch(TranslationRequest {
            record_id: record.id.clone(),
            source_text: record.message.clone(),
            languages,
            requester_id: record.user_id.clone(),
        })
        .await;
    print_outcome(&record.id, &outcome)
}

fn run_channel(args: ChannelArgs, channels: &dyn ChannelSettings) -> Result<()> {
    if let Some(state) = args.state.as_deref() {
        let enabled = parse_toggle(state)?;
        channels.set_enabled(&args.channel_id, enabled)?;
    }
    let enabled = channels.is_enabled(&args.channel_id)?;
    println!(
        "{}",
        json!({"channel_id": args.channel_id, "enabled": enabled})
    );
    Ok(())
}

// An empty explicit list would overwrite the stored payload with nothing.
fn requested_languages(raw: Option<&str>, settings: &Settings) -> Result<Vec<String>> {
    match raw {
        Some(raw) => {
            let languages = parse_language_list(raw);
            if languages.is_empty() {
                return Err(anyhow!("no languages in --languages '{}'", raw));
            }
            Ok(languages)
        }
        None => Ok(settings.target_languages()),
    }
}

fn run_show(
    args: ShowArgs,
    store: &FileRecordStore,
    preferences: &dyn UserPreferences,
) -> Result<()> {
    let record = store
        .get(&args.record_id)?
        .ok_or_else(|| anyhow!("record not found: {}", args.record_id))?;
    let Some(user_id) = args.as_user else {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    };
    let preference = preferences.language(&user_id)?;
    let display = record.display_text(preference.as_deref(), args.locale.as_deref());
    let value = json!({
        "record_id": record.id,
        "user_id": user_id,
        "display": display,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn run_user(args: UserArgs, preferences: &dyn UserPreferences) -> Result<()> {
    if args.clear {
        preferences.set_language(&args.user_id, None)?;
    } else if let Some(language) = args.language.as_deref() {
        if language.trim().is_empty() {
            return Err(anyhow!("language is empty; use --clear to remove the preference"));
        }
        preferences.set_language(&args.user_id, Some(language))?;
    }
    let language = preferences.language(&args.user_id)?;
    println!(
        "{}",
        json!({"user_id": args.user_id, "language": language})
    );
    Ok(())
}

fn run_languages(
    args: LanguagesArgs,
    settings: &Settings,
    preferences: &dyn UserPreferences,
) -> Result<()> {
    let mut value = json!({"languages": settings.target_languages()});
    if let Some(user_id) = args.user.as_deref() {
        value["user_preference"] = json!(preferences.language(user_id)?);
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_outcome(record_id: &str, outcome: &DispatchOutcome) -> Result<()> {
    let value = json!({
        "record_id": record_id,
        "translated": true,
        "translations": outcome.final_entries,
        "failed_languages": outcome.failed_languages,
        "attempts": outcome.attempts,
        "publish_error": outcome.publish_error.as_ref().map(|err| format!("{:#}", err)),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn parse_toggle(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(anyhow!("expected on/off/true/false/1/0")),
    }
}

fn read_stdin() -> Result<String> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(anyhow!("no message given and stdin is a terminal"));
    }
    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .with_context(|| "failed to read stdin")?;
    Ok(buffer)
}

fn generate_record_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("post-{:x}", nanos)
}
