use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tabmind")]
#[command(about = "Coordination core for a browser assistant: memories, tools, suggestions", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create the local database eagerly (otherwise it opens on first use).
    Init { db: PathBuf },

    /// Saved memories: capture, recall, and housekeeping.
    Memory {
        db: PathBuf,
        #[command(subcommand)]
        command: MemoryCommand,
    },

    /// Local response cache with per-entry TTL.
    Cache {
        db: PathBuf,
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Integration records and their enabled state.
    Integration {
        db: PathBuf,
        #[command(subcommand)]
        command: IntegrationCommand,
    },

    /// Start an OAuth connection for an auth config; prints the redirect URL.
    Connect {
        db: PathBuf,
        /// Provider auth config id
        auth_config_id: String,
        /// URL the provider redirects to after authorization
        #[arg(long)]
        callback_url: Option<String>,
    },

    /// Wait for the pending connection to resolve.
    Wait {
        db: PathBuf,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Forget the connection locally (ids and external user identity).
    Disconnect { db: PathBuf },

    /// Tool provider status (configured flag + local connection view).
    Status {
        db: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute a provider tool by slug.
    Tool {
        db: PathBuf,
        /// Tool slug, e.g. GMAIL_SEND_EMAIL
        slug: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Fallback slug tried when the previous one is unknown (repeatable)
        #[arg(long = "fallback")]
        fallbacks: Vec<String>,
    },

    /// Generate suggestions for a page, optionally executing one.
    Suggest {
        db: PathBuf,
        /// Page URL
        url: String,
        /// Page title
        #[arg(long, default_value = "")]
        title: String,
        /// Page text content
        #[arg(long, default_value = "")]
        content: String,
        /// Execute the Nth suggestion (1-based) after listing
        #[arg(long)]
        apply: Option<usize>,
        /// Dismiss the Nth suggestion (1-based) instead of executing it
        #[arg(long, conflicts_with = "apply")]
        dismiss: Option<usize>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a use case by id.
    Run {
        db: PathBuf,
        /// Use-case id, e.g. browser-actions, cross-platform-sync, page-summary
        use_case: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Attach a screenshot of the active tab when the host supports it
        #[arg(long)]
        screenshot: bool,
    },

    /// List available use cases (backend catalog with built-in fallback).
    UseCases {
        db: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum MemoryCommand {
    /// Save a memory (tags derived from content when omitted).
    Save {
        /// Memory text
        text: String,
        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Origin label
        #[arg(long, default_value = "cli")]
        source: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Search memories (local first, backend fallback).
    Search {
        query: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored memories, newest first.
    List {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a memory by id.
    Delete { id: String },
    /// Delete all memories.
    Clear,
    /// Delete memories older than the given number of days.
    Purge {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Show or set the memory privacy switch (on | off).
    Privacy { state: Option<String> },
}

#[derive(Subcommand)]
pub(crate) enum CacheCommand {
    /// Store a JSON value under a key.
    Set {
        key: String,
        /// JSON value
        value: String,
        /// Time to live in seconds (omit for no expiry)
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Read a key (expired entries report a miss).
    Get { key: String },
    /// Delete a key.
    Delete { key: String },
    /// Delete all cached entries.
    Clear,
}

#[derive(Subcommand)]
pub(crate) enum IntegrationCommand {
    /// List saved integration records.
    List {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Create or update an integration record.
    Add {
        id: String,
        #[arg(long)]
        name: String,
        /// Integration family, e.g. composio
        #[arg(long, default_value = "composio")]
        kind: String,
        /// Config as a JSON object
        #[arg(long)]
        config: Option<String>,
    },
    /// Enable an integration.
    Enable { id: String },
    /// Disable an integration.
    Disable { id: String },
}
