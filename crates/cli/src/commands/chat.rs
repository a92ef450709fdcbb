//! `chronicle chat`: Interactive or single-message chat mode.

use std::sync::Arc;

use chronicle_agent::TurnOrchestrator;
use chronicle_config::AppConfig;
use chronicle_memory::HistoryQuery;
use chronicle_providers::OpenAiCompatProvider;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{load_config, open_timeline};

pub async fn run(
    message: Option<String>,
    force_context: bool,
    title: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CHRONICLE_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY    = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let store = open_timeline(&config).await?;
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let tools = Arc::new(chronicle_tools::history_registry(&HistoryQuery::new(
        store.clone(),
    )));
    let agent = TurnOrchestrator::new(store, provider, tools, &config);

    if let Some(msg) = message {
        agent.start_session(title.as_deref()).await?;
        eprint!("  Thinking...");
        let response = agent.respond(&msg, force_context).await?;
        eprint!("\r              \r");
        println!("{response}");
        agent.end_session(None).await?;
        return Ok(());
    }

    let session = agent.start_session(title.as_deref()).await?;

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        chronicle — Interactive Mode          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", config.generation_model);
    println!("  Gate:      {}", config.classification_model);
    println!("  Timeline:  {}", config.memory.database_path);
    println!("  Session:   {session}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Prefix with '!' to force recent context.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"  You > ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        let (text, force) = match input.strip_prefix('!') {
            Some(rest) => (rest.trim(), true),
            None => (input, force_context),
        };

        eprint!("  ...");
        match agent.respond(text, force).await {
            Ok(response) => {
                eprint!("\r     \r");
                println!();
                for line in response.lines() {
                    println!("  Friday > {line}");
                }
                println!();
            }
            Err(e) => {
                eprint!("\r     \r");
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    agent.end_session(None).await?;
    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}
