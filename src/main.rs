use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use insightwave::adapters::ReqwestHttpClient;
use insightwave::api::ApiClient;
use insightwave::chat::{ChatCoordinator, SendOptions};
use insightwave::config::ClientConfig;
use insightwave::error::AppError;
use insightwave::events::{topics, EventBus};
use insightwave::models::{FileAttachment, Role};
use insightwave::services::{ErrorBoundary, NetworkMonitor, PreferencesManager};
use insightwave::storage::StorageService;
use insightwave::store::create_app_store;
use insightwave::store::reducers::attach_file_action;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "\
Commands:
  /new                     start a new chat
  /list                    list saved chats
  /load <chat-id>          switch to a chat
  /delete <chat-id>        delete a chat
  /history                 show the current chat with message ids
  /edit <message-id> <text>  rewrite a message and ask again
  /regen [message-id]      regenerate a reply (default: the last one)
  /attach <path>           attach a file to the next message
  /set <key> <value>       change a preference (value may be JSON)
  /help                    show this help
  /quit                    save and exit
Anything else is sent to the assistant.";

/// Log to stderr so streamed replies on stdout stay readable.
fn init_logging() {
    let filter = std::env::var("INSIGHTWAVE_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct Session {
    coordinator: ChatCoordinator,
    preferences: PreferencesManager,
    boundary: ErrorBoundary,
    network: Arc<NetworkMonitor>,
}

impl Session {
    fn report(&self, error: &AppError) {
        eprintln!("{}: {}", error.category().summary(), error.user_message());
        eprintln!("hint: {}", error.recovery_hint());
        if self.boundary.report(error, "repl") {
            eprintln!("Too many errors in a short time; resetting session state.");
            self.boundary.reset_state();
        }
    }

    fn print_history(&self) {
        let Some(chat) = self.coordinator.current_chat() else {
            println!("No chat selected.");
            return;
        };
        println!("# {} ({})", chat.title, chat.id);
        for message in &chat.messages {
            let who = match (message.role, message.is_error) {
                (_, true) => "error",
                (Role::Human, _) => "you",
                (Role::Assistant, _) => "assistant",
            };
            let edited = if message.edited { " (edited)" } else { "" };
            println!("[{}] {}{}: {}", message.id, who, edited, message.source_text());
            for file in &message.files {
                println!("    attached {} ({})", file.name, file.format_size());
            }
        }
    }

    fn print_chats(&self) {
        let state = self.coordinator.store().get_state();
        if state.chats.is_empty() {
            println!("No chats.");
        }
        for chat in &state.chats {
            let marker = if state.current_chat_id.as_deref() == Some(chat.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{} {}  {}  ({} messages, {})",
                marker,
                chat.id,
                chat.title,
                chat.messages.len(),
                chat.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    fn last_assistant_id(&self) -> Option<String> {
        self.coordinator.current_chat().and_then(|chat| {
            chat.messages
                .iter()
                .rev()
                .find(|m| m.is_assistant())
                .map(|m| m.id.clone())
        })
    }

    fn print_reply(&self, content: &str) {
        let streaming = self.coordinator.store().get_state().preferences.streaming;
        if streaming {
            println!();
        } else {
            println!("{}", content);
        }
    }

    /// Run one input line. Returns false when the session should end.
    async fn handle(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }
        if !line.starts_with('/') {
            match self.coordinator.send_message(line, SendOptions::default()).await {
                Ok(reply) => self.print_reply(reply.source_text()),
                Err(e) => self.report(&e),
            }
            return true;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "/quit" | "/exit" => return false,
            "/help" => println!("{}", HELP),
            "/new" => {
                let chat = self.coordinator.create_new_chat().await;
                println!("Started chat {}", chat.id);
            }
            "/list" => self.print_chats(),
            "/history" => self.print_history(),
            "/load" => match self.coordinator.load_chat(rest).await {
                Ok(chat) => println!("Loaded '{}' ({} messages)", chat.title, chat.messages.len()),
                Err(e) => self.report(&e),
            },
            "/delete" => match self.coordinator.delete_chat(rest).await {
                Ok(()) => println!("Deleted {}", rest),
                Err(e) => self.report(&e),
            },
            "/edit" => {
                let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
                match self.coordinator.edit_message(id, text.trim()).await {
                    Ok(reply) => self.print_reply(reply.source_text()),
                    Err(e) => self.report(&e),
                }
            }
            "/regen" => {
                let id = if rest.is_empty() {
                    self.last_assistant_id()
                } else {
                    Some(rest.to_string())
                };
                match id {
                    Some(id) => match self.coordinator.regenerate_message(&id).await {
                        Ok(reply) => self.print_reply(reply.source_text()),
                        Err(e) => self.report(&e),
                    },
                    None => println!("Nothing to regenerate."),
                }
            }
            "/attach" => match FileAttachment::from_path(Path::new(rest)) {
                Ok(file) => {
                    println!("Attached {} ({})", file.name, file.format_size());
                    self.coordinator.store().dispatch_plain(attach_file_action(&file));
                }
                Err(e) => eprintln!("error: cannot read {}: {}", rest, e),
            },
            "/set" => {
                let Some((key, value)) = rest.split_once(' ') else {
                    println!("usage: /set <key> <value>");
                    return true;
                };
                let value = serde_json::from_str::<Value>(value.trim())
                    .unwrap_or_else(|_| Value::String(value.trim().to_string()));
                let mut partial = serde_json::Map::new();
                partial.insert(key.to_string(), value);
                self.preferences.update(Value::Object(partial)).await;
                println!("{} updated", key);
            }
            other => println!("Unknown command {}. Try /help.", other),
        }
        true
    }
}

async fn run() -> Result<()> {
    let config = ClientConfig::from_env().map_err(|e| eyre!(e.user_message()))?;

    let bus = EventBus::new();
    let http = ReqwestHttpClient::with_connect_timeout(config.connect_timeout)
        .map_err(|e| eyre!("failed to build HTTP client: {}", e))?;
    let api = Arc::new(ApiClient::new(Arc::new(http), config.api_config()).with_bus(bus.clone()));

    let storage_config = config
        .storage_config()
        .map_err(|e| eyre!(e.user_message()))?;
    let storage = StorageService::initialize(&storage_config).await;
    tracing::info!("Storage backend: {}", storage.backend_kind());

    let store = create_app_store(Default::default(), Some(bus.clone()));
    let preferences = PreferencesManager::new(store.clone(), storage.clone(), bus.clone(), api.clone());
    preferences.load().await;

    let network = Arc::new(NetworkMonitor::new(store.clone(), bus.clone(), api.clone()));
    network.check_now().await;
    network.start(config.network_check_interval);
    bus.subscribe(topics::NETWORK_OFFLINE, |_| {
        eprintln!("(offline)");
        Ok(())
    });
    bus.subscribe(topics::NETWORK_ONLINE, |_| {
        eprintln!("(back online)");
        Ok(())
    });

    let boundary = ErrorBoundary::new(store.clone(), bus.clone(), config.boundary_config());

    let coordinator = ChatCoordinator::with_parts(
        store.clone(),
        storage,
        api.clone(),
        bus.clone(),
        Arc::new(insightwave::chat::MarkdownRenderer),
        config.coordinator_config(),
    );
    coordinator.initialize().await;
    coordinator.start_auto_save();
    coordinator.attach(&bus);

    bus.subscribe(topics::ASSISTANT_STREAMING, |event| {
        if let Some(delta) = event.payload.get("delta").and_then(Value::as_str) {
            print!("{}", delta);
            std::io::stdout().flush()?;
        }
        Ok(())
    });

    if !api.has_api_key() {
        println!("No API key configured. Use /set apiKey <key> or set INSIGHTWAVE_API_KEY.");
    }
    let session = Session {
        coordinator: coordinator.clone(),
        preferences,
        boundary,
        network,
    };
    if let Some(chat) = coordinator.current_chat() {
        println!("insightwave {} - chat '{}'. Type /help for commands.", VERSION, chat.title);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if !session.handle(&line).await {
            break;
        }
    }

    session.network.stop();
    coordinator.shutdown().await;
    Ok(())
}

fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("insightwave {}", VERSION);
        return Ok(());
    }

    color_eyre::install()?;
    init_logging();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}
