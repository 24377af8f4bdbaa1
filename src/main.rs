use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod animator;
mod app;
mod chatlog;
mod config;
mod dispatcher;
mod handler;
mod knowledge;
mod proxy;
mod remote;
mod tui;
mod ui;

use app::App;
use chatlog::{ChatLog, LogEntry};
use config::Config;
use dispatcher::ResponseDispatcher;
use knowledge::KnowledgeBase;
use remote::FallbackClient;

const DEFAULT_UPSTREAM: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash-latest:generateContent";

#[derive(Parser)]
#[command(name = "coursebot")]
#[command(about = "Chat assistant for the ProTools ER1 economics programming course")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// Ask a single question and print the answer
    Ask {
        /// Your question
        question: String,
    },
    /// List the topics the built-in knowledge base covers
    Topics,
    /// Export the chat log to a dated JSON file in the current directory
    Export,
    /// Print how many exchanges are logged
    Count,
    /// Clear the chat log
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Run the AI fallback proxy locally
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8787")]
        addr: SocketAddr,
        /// Upstream generate endpoint
        #[arg(long, default_value = DEFAULT_UPSTREAM)]
        upstream: String,
        /// Daily request ceiling
        #[arg(long, default_value_t = proxy::DAILY_LIMIT)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|err| {
        tracing::debug!(error = %err, "config unreadable, using defaults");
        Config::default()
    });

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(config).await,
        Commands::Ask { question } => ask_once(&config, &question).await,
        Commands::Topics => list_topics(&config),
        Commands::Export => export_log(&config),
        Commands::Count => count_log(&config),
        Commands::Clear { yes } => clear_log(&config, yes),
        Commands::Serve {
            addr,
            upstream,
            limit,
        } => run_proxy(addr, upstream, limit).await,
    }
}

async fn run_chat(config: Config) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    tui::spawn_input_tasks(tx.clone());
    let mut app = App::new(&config, tx)?;

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;
        match rx.recv().await {
            Some(event) => handler::handle_event(&mut app, event)?,
            None => break,
        }
    }

    tui::restore()?;
    Ok(())
}

fn load_kb(config: &Config) -> Result<KnowledgeBase> {
    match &config.knowledge_file {
        Some(path) => KnowledgeBase::load_from_file(path),
        None => KnowledgeBase::builtin(),
    }
}

fn open_log(config: &Config) -> ChatLog {
    match ChatLog::default_path() {
        Some(path) => ChatLog::open(path, config.log_cap),
        None => ChatLog::in_memory(config.log_cap),
    }
}

async fn ask_once(config: &Config, question: &str) -> Result<()> {
    let kb = Arc::new(load_kb(config)?);
    let fallback = match (&config.fallback_url, config.fallback_enabled) {
        (Some(url), true) => Some(FallbackClient::new(url, config.fallback_timeout())?),
        _ => None,
    };
    // No artificial pause on the command line.
    let dispatcher = ResponseDispatcher::new(kb, fallback, Duration::ZERO)?;

    let mut log = open_log(config);
    log.record(LogEntry::user(question));

    println!("{} {}", "You:".bold().cyan(), question);
    let reply = dispatcher.respond(question).await;
    log.record(LogEntry::assistant(&reply.text, question, reply.source));

    println!("{} {}", "Assistant:".bold().yellow(), reply.text);
    Ok(())
}

fn list_topics(config: &Config) -> Result<()> {
    let kb = load_kb(config)?;

    println!("\n{}", "Knowledge base topics".bold().blue());
    println!("{}", "=".repeat(40).dimmed());
    for entry in kb.entries() {
        println!(
            "• {} {}",
            entry.question.bold().green(),
            format!("({})", entry.keywords.join(", ")).dimmed()
        );
    }
    println!("\n{} entries", kb.len().to_string().bold());
    Ok(())
}

fn export_log(config: &Config) -> Result<()> {
    let log = open_log(config);
    let dir = std::env::current_dir()?;
    let path = log.export(&dir)?;
    println!(
        "Exported {} entries to {}",
        log.count().to_string().bold(),
        path.display().to_string().green()
    );
    Ok(())
}

fn count_log(config: &Config) -> Result<()> {
    let log = open_log(config);
    println!("Total chat log entries: {}", log.count().to_string().bold());
    Ok(())
}

fn clear_log(config: &Config, yes: bool) -> Result<()> {
    let mut log = open_log(config);
    if log.count() == 0 {
        println!("Chat log is already empty.");
        return Ok(());
    }

    let confirmed = yes
        || Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Clear all {} chat log entries?", log.count()))
            .default(false)
            .interact()?;

    if confirmed {
        log.clear();
        println!("{}", "Chat log cleared.".green());
    } else {
        println!("Nothing cleared.");
    }
    Ok(())
}

async fn run_proxy(addr: SocketAddr, upstream: String, limit: u32) -> Result<()> {
    let api_key = std::env::var("GEMINI_API_KEY")
        .map_err(|_| anyhow!("GEMINI_API_KEY must be set to run the proxy"))?;

    println!(
        "{} {} {}",
        "Fallback proxy on".bold().blue(),
        addr.to_string().bold(),
        format!("(daily limit {limit})").dimmed()
    );
    let state = Arc::new(proxy::ProxyState::new(upstream, api_key, limit));
    proxy::serve(addr, state).await
}
