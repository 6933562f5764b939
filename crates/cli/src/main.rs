mod backend;
mod config;
mod error;

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use runtime::conversation::content_text;
use runtime::{Backend, HostAddress, McpDialer, Message, Session};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const SYSTEM_PROMPT: &str =
    "You are Tether, a helpful assistant with access to tools. Be concise and direct.";
const CONFIG_FILE: &str = "tether.toml";
const PREVIEW_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Chat with a model that can call MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    config.session.validate()?;
    let backend = config.build_backend()?;

    println!("tether v{}", env!("CARGO_PKG_VERSION"));
    println!("Model: {backend}");

    let system = config.backend.system.as_deref().unwrap_or(SYSTEM_PROMPT);
    let session = Session::new(backend, McpDialer)
        .with_config(config.session.clone())
        .with_system(system);
    println!("Session ID: {}", session.id);
    if session.selection().is_prompted() {
        println!("Tool calling: prompted");
    }

    session
        .scoped(async |session| {
            connect_servers(session, &config.servers).await?;
            println!("Type 'quit' or Ctrl+D to exit.\n");
            chat(session).await
        })
        .await?;

    println!("\nSession ended.");
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

async fn connect_servers<B: Backend>(
    session: &mut Session<B>,
    servers: &BTreeMap<String, HostAddress>,
) -> Result<()> {
    for (host, address) in servers {
        let handle = session
            .connect(host, address)
            .await
            .map_err(|source| Error::Host {
                host: host.clone(),
                source,
            })?;
        let count = session
            .connector()
            .catalog()
            .host(handle.host())
            .map_or(0, |tools| tools.len());
        println!("Connected to {host} ({count} tools)");
    }
    Ok(())
}

async fn chat<B: Backend>(session: &mut Session<B>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        // Skip the user message we are about to add.
        let seen = session.conversation().len() + 1;
        match session.process_query(input).await {
            Ok(conversation) => print_messages(&conversation[seen..]),
            Err(failure) => {
                print_messages(failure.conversation.get(seen..).unwrap_or_default());
                eprintln!("Error: {}\n", failure.error);
            }
        }
    }

    Ok(())
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        match message {
            Message::UserText { .. } => {}
            Message::AssistantText { content } => println!("\n{content}\n"),
            Message::AssistantToolCalls { calls } => {
                for call in calls {
                    println!("  [call] {} {}", call.name, call.arguments);
                }
            }
            Message::ToolResult { content, .. } => {
                println!("  [result] {}", preview(&content_text(content)));
            }
        }
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
