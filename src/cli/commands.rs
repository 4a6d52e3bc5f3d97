use super::{
    Cli, Commands, FilterArgs, LlmAction, SavedAction, SessionAction, StorageAction, ViewKind,
};
use crate::relay::{ApiClient, ChatRelay, GenericResponse, ProgressCallback, UploadProgress};
use crate::shared::ranking::{self, session_views};
use crate::shared::{
    Config, LiveSearch, LocalStorage, Message, SavedSearches, SearchFilters, SearchHistory,
    SearchQuery, SearchResult, SessionStore, SessionUpdate, get_config, search_sessions, snippet,
};
use anyhow::{Result, anyhow};
use chrono::Utc;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    let config = get_config();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config.get_data_dir()?,
    };
    let storage = LocalStorage::new(&data_dir)?;

    match cli.command {
        Commands::Session { action } => session_command(&storage, action)?,
        Commands::Message { text, session, bot } => {
            let mut store = SessionStore::load(storage);
            let session_id = resolve_session(&store, session)?;
            let message = if bot {
                Message::bot(text)
            } else {
                Message::user(text)
            };
            store.add_message(&session_id, message);
            println!("Added message to {}", short_id(&session_id));
        }
        Commands::Search {
            query,
            filters,
            limit,
            json,
        } => {
            let store = SessionStore::load(storage.clone());
            let mut history = SearchHistory::load(storage, config.search.history_limit);
            let query = build_query(query, &filters, limit);
            run_search(&store, &mut history, &query, json)?;
        }
        Commands::Live { filters } => live_search(storage, config, &filters).await?,
        Commands::Views { view } => show_views(&SessionStore::load(storage), config, view),
        Commands::SearchHistory { clear } => {
            let mut history = SearchHistory::load(storage, config.search.history_limit);
            if clear {
                history.clear();
                println!("Search history cleared.");
            } else if history.entries().is_empty() {
                println!("No recent searches.");
            } else {
                for (i, query) in history.entries().iter().enumerate() {
                    println!("{}. {}", i + 1, query);
                }
            }
        }
        Commands::Saved { action } => saved_command(&storage, config, action)?,
        Commands::Upload {
            file,
            session,
            mime,
        } => upload_file(storage, config, &file, session, mime).await?,
        Commands::Command { text, session } => {
            let relay = ChatRelay::new(api_client(config)?);
            let mut store = SessionStore::load(storage);
            let session_id = resolve_session(&store, session)?;
            relay.execute(&mut store, &session_id, &text).await;
            print_last_message(&store, &session_id);
        }
        Commands::Interpret { text, session } => {
            let relay = ChatRelay::new(api_client(config)?);
            let mut store = SessionStore::load(storage);
            let session_id = resolve_session(&store, session)?;
            relay.interpret(&mut store, &session_id, &text).await;
            print_last_message(&store, &session_id);
        }
        Commands::Suggest { partial, session } => {
            let relay = ChatRelay::new(api_client(config)?);
            let store = SessionStore::load(storage);
            let session_id = resolve_session(&store, session)?;
            let suggestions = relay.suggestions(&store, &session_id, &partial).await;
            if suggestions.is_empty() {
                println!("No suggestions.");
            }
            for suggestion in suggestions {
                println!("  {suggestion}");
            }
        }
        Commands::Llm { action } => llm_command(&api_client(config)?, action).await?,
        Commands::Storage { action } => match action {
            StorageAction::Info => show_storage_info(&storage),
            StorageAction::Clear => clear_storage(&storage)?,
        },
    }

    Ok(())
}

fn api_client(config: &Config) -> Result<ApiClient> {
    Ok(ApiClient::new(&config.api, config.upload.clone())?)
}

/// Explicit id (or unique id prefix), else the active session.
fn resolve_session(store: &SessionStore, session: Option<String>) -> Result<String> {
    let Some(wanted) = session else {
        return store
            .active_session_id()
            .map(|id| id.to_string())
            .ok_or_else(|| anyhow!("No active session. Create one with 'audio-chat session new'"));
    };

    if store.get_session(&wanted).is_some() {
        return Ok(wanted);
    }

    let matches: Vec<&str> = store
        .sessions()
        .iter()
        .filter(|s| s.id.starts_with(&wanted))
        .map(|s| s.id.as_str())
        .collect();
    match matches.as_slice() {
        [id] => Ok(id.to_string()),
        [] => Err(anyhow!("No session matches '{}'", wanted)),
        _ => Err(anyhow!("'{}' matches {} sessions", wanted, matches.len())),
    }
}

/// Extract first 8 characters of an id for display
fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(i, _)| &id[..i])
}

fn session_command(storage: &LocalStorage, action: SessionAction) -> Result<()> {
    let mut store = SessionStore::load(storage.clone());

    match action {
        SessionAction::New { title } => {
            let id = store.create_session(&title);
            println!("Created session {} ({})", id, title);
        }
        SessionAction::List { archived } => {
            let active = store.active_session_id();
            let mut shown = 0;
            for session in store.sessions() {
                if session.is_archived && !archived {
                    continue;
                }
                let mut flags = String::new();
                if Some(session.id.as_str()) == active {
                    flags.push('*');
                }
                if session.is_pinned() {
                    flags.push('P');
                }
                if session.is_archived {
                    flags.push('A');
                }
                println!(
                    "{:<3} {}  {}  {} msgs  {}",
                    flags,
                    short_id(&session.id),
                    session.last_activity().format("%Y-%m-%d %H:%M"),
                    session.messages.len(),
                    session.title
                );
                shown += 1;
            }
            if shown == 0 {
                println!("No sessions.");
            }
        }
        SessionAction::Show { id } => {
            let id = resolve_session(&store, Some(id))?;
            if let Some(session) = store.get_session(&id) {
                println!("Session: {} ({})", session.title, session.id);
                println!("Created: {}", session.created_at.format("%Y-%m-%d %H:%M"));
                if let Some(file_id) = &session.metadata.file_id {
                    println!("File: {file_id}");
                }
                println!("{}", "─".repeat(60));
                for message in &session.messages {
                    println!(
                        "[{}] {}: {}",
                        session.message_time(message).format("%H:%M:%S"),
                        message.sender.short_name(),
                        message.text
                    );
                }
            }
        }
        SessionAction::Use { id } => {
            let id = resolve_session(&store, Some(id))?;
            store.set_active_session(&id);
            println!("Active session: {}", short_id(&id));
        }
        SessionAction::Rename { id, title } => {
            let id = resolve_session(&store, Some(id))?;
            store.update_session(
                &id,
                SessionUpdate {
                    title: Some(title),
                    ..Default::default()
                },
            );
            println!("Renamed {}", short_id(&id));
        }
        SessionAction::Delete { id } => {
            let id = resolve_session(&store, Some(id))?;
            store.delete_session(&id);
            println!("Deleted {}", short_id(&id));
        }
        SessionAction::Archive { id } => {
            let id = resolve_session(&store, Some(id))?;
            match store.archive_session(&id) {
                Some(true) => println!("Archived {}", short_id(&id)),
                Some(false) => println!("Restored {}", short_id(&id)),
                None => {}
            }
        }
        SessionAction::Pin { id } => {
            let id = resolve_session(&store, Some(id))?;
            match ranking::toggle_pin(&mut store, &id) {
                Some(true) => println!("Pinned {}", short_id(&id)),
                Some(false) => println!("Unpinned {}", short_id(&id)),
                None => {}
            }
        }
    }

    Ok(())
}

fn build_filters(filters: &FilterArgs) -> SearchFilters {
    SearchFilters {
        sender: filters.sender.into(),
        session_id: filters.session.clone(),
        date_from: filters.from,
        date_to: filters.to,
    }
}

fn build_query(text: String, filters: &FilterArgs, limit: usize) -> SearchQuery {
    SearchQuery {
        text,
        use_regex: filters.regex,
        filters: build_filters(filters),
        limit,
    }
}

fn run_search(
    store: &SessionStore,
    history: &mut SearchHistory,
    query: &SearchQuery,
    json: bool,
) -> Result<()> {
    let results = search_sessions(store.sessions(), query);
    history.record(query.text.trim());

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    print_results(&results);
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    println!("Found {} results:\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{}] {} {} ({} matches)",
            i + 1,
            result.session_title,
            result.timestamp.format("%Y-%m-%d %H:%M"),
            result.sender.short_name(),
            result.highlights.len()
        );
        println!("   Session: {}", short_id(&result.session_id));
        println!(
            "   {}\n",
            snippet(&result.message_text, &result.highlights, 60)
        );
    }
}

async fn live_search(storage: LocalStorage, config: &Config, filters: &FilterArgs) -> Result<()> {
    let store = SessionStore::load(storage.clone());
    let history = Arc::new(Mutex::new(SearchHistory::load(
        storage,
        config.search.history_limit,
    )));
    let debounce = Duration::from_millis(config.search.debounce_ms);

    let mut live = LiveSearch::new(store.sessions().to_vec(), history, debounce);
    live.set_regex(filters.regex);
    live.set_filters(build_filters(filters));

    let mut results_rx = live.subscribe();
    let printer = tokio::spawn(async move {
        while results_rx.changed().await.is_ok() {
            let latest = results_rx.borrow_and_update().clone();
            if latest.query.is_empty() {
                continue;
            }
            println!("── {:?}", latest.query);
            print_results(&latest.results);
        }
    });

    println!("Type a query per line; Ctrl-D to finish.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        live.set_query(line.trim());
    }

    // Let the last pending search fire before shutting down.
    tokio::time::sleep(debounce + Duration::from_millis(50)).await;
    drop(live);
    let _ = printer.await;
    Ok(())
}

fn show_views(store: &SessionStore, config: &Config, view: ViewKind) {
    let views = session_views(store.sessions(), &config.ranking, Utc::now());

    if matches!(view, ViewKind::All | ViewKind::Recent) {
        println!("Recent:");
        if views.recent.is_empty() {
            println!("  (none)");
        }
        for session in &views.recent {
            println!(
                "  {}  {}  {}",
                short_id(&session.id),
                session.last_activity().format("%Y-%m-%d %H:%M"),
                session.title
            );
        }
        println!();
    }

    if matches!(view, ViewKind::All | ViewKind::Popular) {
        println!("Popular:");
        if views.popular.is_empty() {
            println!("  (none)");
        }
        for popular in &views.popular {
            println!(
                "  {}  score {:>7.2}  {} msgs  {}",
                short_id(&popular.session.id),
                popular.score,
                popular.session.messages.len(),
                popular.session.title
            );
        }
        println!();
    }

    if matches!(view, ViewKind::All | ViewKind::Pinned) {
        println!("Pinned:");
        if views.pinned.is_empty() {
            println!("  (none)");
        }
        for session in &views.pinned {
            println!("  {}  {}", short_id(&session.id), session.title);
        }
    }
}

fn saved_command(storage: &LocalStorage, config: &Config, action: SavedAction) -> Result<()> {
    let mut saved = SavedSearches::load(storage.clone())?;

    match action {
        SavedAction::Save {
            name,
            query,
            filters,
        } => {
            let entry = saved.save(&name, &build_query(query, &filters, 0))?;
            println!("Saved search '{}' ({})", entry.name, short_id(&entry.id));
        }
        SavedAction::List => {
            if saved.list().is_empty() {
                println!("No saved searches.");
            }
            for entry in saved.list() {
                println!(
                    "{}  {}  {:?}{}  (saved {})",
                    short_id(&entry.id),
                    entry.name,
                    entry.query,
                    if entry.use_regex { " [regex]" } else { "" },
                    entry.created_at.format("%Y-%m-%d")
                );
            }
        }
        SavedAction::Run { id } => {
            let query = saved
                .get(&id)
                .map(|entry| entry.to_query())
                .ok_or_else(|| anyhow!("No saved search '{}'", id))?;
            let store = SessionStore::load(storage.clone());
            let mut history = SearchHistory::load(storage.clone(), config.search.history_limit);
            run_search(&store, &mut history, &query, false)?;
        }
        SavedAction::Delete { id } => {
            if saved.delete(&id)? {
                println!("Deleted saved search '{}'", id);
            } else {
                println!("No saved search '{}'", id);
            }
        }
    }

    Ok(())
}

async fn upload_file(
    storage: LocalStorage,
    config: &Config,
    file: &Path,
    session: Option<String>,
    mime: Option<String>,
) -> Result<()> {
    let relay = ChatRelay::new(api_client(config)?);
    let mut store = SessionStore::load(storage);
    let session_id = match session {
        Some(session) => resolve_session(&store, Some(session))?,
        None => match store.active_session_id() {
            Some(id) => id.to_string(),
            None => {
                let title = file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "Audio session".to_string());
                store.create_session(&title)
            }
        },
    };

    let progress: ProgressCallback = Arc::new(|p: UploadProgress| {
        print!("\rUploading... {:>5.1}%", p.percent());
        let _ = std::io::stdout().flush();
    });

    let uploaded = relay
        .upload(&mut store, &session_id, file, mime.as_deref(), Some(progress))
        .await;
    println!();

    if let Some(uploaded) = uploaded {
        info!("File id {}", uploaded.file_id);
    }
    print_last_message(&store, &session_id);
    Ok(())
}

fn print_last_message(store: &SessionStore, session_id: &str) {
    if let Some(message) = store
        .get_session(session_id)
        .and_then(|s| s.messages.last())
    {
        println!("{}: {}", message.sender.short_name(), message.text);
    }
}

fn print_payload(response: &GenericResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&response.data)?);
    Ok(())
}

async fn llm_command(client: &ApiClient, action: LlmAction) -> Result<()> {
    match action {
        LlmAction::Models => {
            let response = client.list_models().await?;
            if response.models.is_empty() {
                println!("No models reported by {}", client.base_url());
            }
            for model in &response.models {
                println!(
                    "  {}  {}{}",
                    model.id,
                    model.display_name(),
                    model
                        .provider
                        .as_deref()
                        .map(|p| format!(" ({p})"))
                        .unwrap_or_default()
                );
            }
        }
        LlmAction::Active => {
            let response = client.active_model().await?;
            match response.active_id() {
                Some(id) => println!("Active model: {id}"),
                None => println!("No active model."),
            }
        }
        LlmAction::SetActive { model_id } => {
            let response = client.set_active_model(&model_id).await?;
            println!(
                "Active model: {}",
                response.active_id().unwrap_or(model_id.as_str())
            );
        }
        LlmAction::Metrics => print_payload(&client.model_metrics().await?)?,
        LlmAction::Status => print_payload(&client.connection_status().await?)?,
        LlmAction::Usage => print_payload(&client.usage_stats().await?)?,
    }

    Ok(())
}

fn show_storage_info(storage: &LocalStorage) {
    let store = SessionStore::load(storage.clone());
    let archived = store.sessions().iter().filter(|s| s.is_archived).count();
    let messages: usize = store.sessions().iter().map(|s| s.messages.len()).sum();

    println!("Storage Information:");
    println!("  Location: {}", storage.dir().display());
    println!("  Size: {:.2} KB", storage.size_bytes() as f64 / 1024.0);
    println!(
        "  Sessions: {} ({} archived)",
        store.sessions().len(),
        archived
    );
    println!("  Messages: {}", messages);
}

fn clear_storage(storage: &LocalStorage) -> Result<()> {
    let mut store = SessionStore::load(storage.clone());
    store.clear_all();
    storage.remove(crate::shared::SEARCH_HISTORY_KEY)?;
    storage.remove(crate::shared::SAVED_SEARCHES_KEY)?;
    println!("Storage cleared.");
    Ok(())
}
