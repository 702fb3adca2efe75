// Module declarations
mod browser;
mod cli;
mod gateway;
mod memories;
mod store;
mod suggest;
mod telemetry;
mod toolbridge;
mod types;
mod usecase;
mod util;

#[cfg(test)]
mod testutil;

// Re-export all module items at crate root so cross-module references work.
#[allow(unused_imports)]
pub(crate) use browser::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use gateway::*;
#[allow(unused_imports)]
pub(crate) use memories::*;
#[allow(unused_imports)]
pub(crate) use store::*;
#[allow(unused_imports)]
pub(crate) use suggest::*;
#[allow(unused_imports)]
pub(crate) use telemetry::*;
#[allow(unused_imports)]
pub(crate) use toolbridge::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use usecase::*;
#[allow(unused_imports)]
pub(crate) use util::*;

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use clap::Parser;

/// Everything `main` needs, wired once per invocation. Components share the
/// store and API client through cheap clones.
struct App {
    store: LocalStore,
    keeper: MemoryKeeper,
    bridge: ToolBridge,
    runner: UseCaseRunner,
    engine: SuggestionEngine,
}

impl App {
    fn build(db: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let store = LocalStore::new(db);
        let api = ApiClient::from_env()?;
        let telemetry = Telemetry::from_env();
        let host: SharedHost = Arc::new(HeadlessHost);
        let keeper = MemoryKeeper::new(store.clone(), api.clone(), telemetry.clone());
        let bridge = ToolBridge::new(api.clone(), store.clone(), telemetry);
        let runner = UseCaseRunner::new(api.clone(), bridge.clone(), keeper.clone(), host.clone());
        let engine = SuggestionEngine::new(api, keeper.clone(), runner.clone(), host);
        Ok(Self {
            store,
            keeper,
            bridge,
            runner,
            engine,
        })
    }
}

fn fmt_ts(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn preview(content: &str, max_chars: usize) -> String {
    let mut out: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        out.push('…');
    }
    out.replace('\n', " ")
}

fn parse_json_object(
    raw: Option<&str>,
    what: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, Box<dyn std::error::Error>> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(format!("{what} must be a JSON object").into()),
    }
}

fn print_memory(memory: &Memory) {
    println!(
        "[{}] {} ({})",
        fmt_ts(memory.timestamp),
        memory.id,
        memory.tags.join(", ")
    );
    println!("  {}", preview(&memory.content, 120));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Init { db } => {
            let store = LocalStore::new(&db);
            store.ensure_open()?;
            println!("Created {}", db.display());
            Ok(())
        }

        Command::Memory { db, command } => {
            let app = App::build(&db)?;
            run_memory_command(&app, command)
        }

        Command::Cache { db, command } => {
            let store = LocalStore::new(&db);
            run_cache_command(&store, command)
        }

        Command::Integration { db, command } => {
            let app = App::build(&db)?;
            run_integration_command(&app, command)
        }

        Command::Connect {
            db,
            auth_config_id,
            callback_url,
        } => {
            let app = App::build(&db)?;
            let data = app.bridge.connect(&auth_config_id, callback_url.as_deref())?;
            match data.get("redirectUrl").and_then(|u| u.as_str()) {
                Some(url) => println!("Visit to authorize: {url}"),
                None => println!("{}", serde_json::to_string_pretty(&data)?),
            }
            Ok(())
        }

        Command::Wait { db, timeout } => {
            let app = App::build(&db)?;
            let status = app.bridge.wait_for_connection(timeout)?;
            println!("Connection status: {status}");
            Ok(())
        }

        Command::Disconnect { db } => {
            let app = App::build(&db)?;
            if app.bridge.local_connection_info()?.is_empty() {
                println!("No connection state to clear");
            }
            app.bridge.disconnect_local()?;
            println!("Disconnected locally; external user id reset");
            Ok(())
        }

        Command::Status { db, json } => {
            let app = App::build(&db)?;
            let summary = app.bridge.auth_status();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let configured = summary["configured"].as_bool().unwrap_or(false);
                let message = summary["message"].as_str().unwrap_or("unknown");
                println!("provider: {message} (configured: {configured})");
            }
            Ok(())
        }

        Command::Tool {
            db,
            slug,
            args,
            fallbacks,
        } => {
            let app = App::build(&db)?;
            let args_map = parse_json_object(args.as_deref(), "--args")?;
            let args_value = serde_json::Value::Object(args_map);
            let data = if fallbacks.is_empty() {
                app.bridge.execute(&slug, &args_value)?
            } else {
                let mut slugs = vec![slug];
                slugs.extend(fallbacks);
                app.bridge.execute_with_fallback(&slugs, &args_value)?
            };
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }

        Command::Suggest {
            db,
            url,
            title,
            content,
            apply,
            dismiss,
            json,
        } => {
            let app = App::build(&db)?;
            let context = PageContext {
                url,
                title,
                content,
            };
            let suggestions = app.engine.get_suggestions(Some(&context))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
            } else if suggestions.is_empty() {
                println!("No suggestions to offer");
            } else {
                for (i, s) in suggestions.iter().enumerate() {
                    println!(
                        "{}. [{}] {} ({:.0}%)",
                        i + 1,
                        s.action,
                        s.text,
                        s.confidence * 100.0
                    );
                }
            }

            if let Some(n) = apply {
                let Some(chosen) = suggestions.get(n.saturating_sub(1)) else {
                    eprintln!("No suggestion #{n} to apply");
                    std::process::exit(2);
                };
                let result = app.engine.execute(&chosen.id)?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(n) = dismiss {
                let Some(chosen) = suggestions.get(n.saturating_sub(1)) else {
                    eprintln!("No suggestion #{n} to dismiss");
                    std::process::exit(2);
                };
                app.engine.dismiss(&chosen.id)?;
                println!("Dismissed {}", chosen.id);
            }
            Ok(())
        }

        Command::Run {
            db,
            use_case,
            params,
            screenshot,
        } => {
            let app = App::build(&db)?;
            let input = UseCaseInput {
                use_case_id: use_case,
                parameters: parse_json_object(params.as_deref(), "--params")?,
                include_screenshot: screenshot,
            };
            let output = app.runner.execute(input);
            println!("{}", serde_json::to_string_pretty(&output)?);
            if output.status == RunStatus::Error {
                std::process::exit(1);
            }
            Ok(())
        }

        Command::UseCases { db, json } => {
            let app = App::build(&db)?;
            let defs = app.runner.list_use_cases();
            if json {
                println!("{}", serde_json::to_string_pretty(&defs)?);
            } else {
                for def in defs {
                    println!("{} - {} [{}]", def.id, def.name, def.category);
                    println!("  {}", def.description);
                }
            }
            Ok(())
        }
    }
}

fn run_memory_command(app: &App, command: MemoryCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        MemoryCommand::Save {
            text,
            tags,
            source,
            json,
        } => {
            let memory = app.keeper.save(MemoryDraft {
                content: text,
                tags,
                source,
                metadata: None,
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&memory)?);
            } else {
                println!("Saved {} (tags: {})", memory.id, memory.tags.join(", "));
            }
            Ok(())
        }
        MemoryCommand::Search { query, limit, json } => {
            let results = app.keeper.search(&query, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No matches");
            } else {
                for memory in &results {
                    print_memory(memory);
                }
            }
            Ok(())
        }
        MemoryCommand::List { limit, json } => {
            let total = app.store.memory_count()?;
            let mut memories = app.store.list_memories()?;
            memories.truncate(limit);
            if json {
                println!("{}", serde_json::to_string_pretty(&memories)?);
            } else {
                for memory in &memories {
                    print_memory(memory);
                }
                println!("{} of {total} shown", memories.len());
            }
            Ok(())
        }
        MemoryCommand::Delete { id } => {
            if app.keeper.delete(&id)? {
                println!("Deleted {id}");
            } else {
                eprintln!("No memory with id {id}");
                std::process::exit(2);
            }
            Ok(())
        }
        MemoryCommand::Clear => {
            let removed = app.keeper.clear()?;
            println!("Deleted {removed} memories");
            Ok(())
        }
        MemoryCommand::Purge { days } => {
            let removed = app.keeper.cleanup(days)?;
            println!("Purged {removed} memories older than {days} days");
            Ok(())
        }
        MemoryCommand::Privacy { state } => {
            match state.as_deref() {
                None => {
                    let enabled = app.store.memory_enabled()?;
                    println!("memory capture: {}", if enabled { "on" } else { "off" });
                }
                Some("on") => {
                    app.store.set_memory_enabled(true)?;
                    println!("memory capture: on");
                }
                Some("off") => {
                    app.store.set_memory_enabled(false)?;
                    println!("memory capture: off");
                }
                Some(other) => {
                    eprintln!("Expected on or off, got {other}");
                    std::process::exit(2);
                }
            }
            Ok(())
        }
    }
}

fn run_cache_command(
    store: &LocalStore,
    command: CacheCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        CacheCommand::Set { key, value, ttl } => {
            let parsed: serde_json::Value = serde_json::from_str(&value)?;
            store.cache_set(&key, &parsed, ttl)?;
            println!("Cached {key}");
            Ok(())
        }
        CacheCommand::Get { key } => {
            match store.cache_get(&key)? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    eprintln!("Cache miss: {key}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        CacheCommand::Delete { key } => {
            if store.cache_delete(&key)? {
                println!("Deleted {key}");
            } else {
                println!("Nothing cached under {key}");
            }
            Ok(())
        }
        CacheCommand::Clear => {
            let removed = store.cache_clear()?;
            println!("Cleared {removed} cache entries");
            Ok(())
        }
    }
}

fn run_integration_command(
    app: &App,
    command: IntegrationCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        IntegrationCommand::List { json } => {
            let records = app.store.list_integrations()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No integrations saved");
            } else {
                for record in &records {
                    println!(
                        "{} ({}) {} [{}]",
                        record.id,
                        record.kind,
                        record.name,
                        if record.enabled { "enabled" } else { "disabled" }
                    );
                }
            }
            Ok(())
        }
        IntegrationCommand::Add {
            id,
            name,
            kind,
            config,
        } => {
            let config_map = parse_json_object(config.as_deref(), "--config")?;
            app.store.save_integration(&IntegrationRecord {
                id: id.clone(),
                name,
                kind,
                config: serde_json::Value::Object(config_map),
                enabled: true,
                last_used: None,
            })?;
            println!("Saved integration {id}");
            Ok(())
        }
        IntegrationCommand::Enable { id } => set_integration_enabled(app, &id, true),
        IntegrationCommand::Disable { id } => set_integration_enabled(app, &id, false),
    }
}

fn set_integration_enabled(
    app: &App,
    id: &str,
    enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(mut record) = app.store.get_integration(id)? else {
        return Err(format!("integration not found: {id}").into());
    };
    record.enabled = enabled;
    app.store.save_integration(&record)?;
    println!(
        "{} {}",
        if enabled { "Enabled" } else { "Disabled" },
        record.id
    );
    Ok(())
}
