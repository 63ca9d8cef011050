use std::env;

use kbase_assist::{KnowledgeAssistant, StartupMode};
use kbase_core::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {} <rebuild|resolve|stats> [args...]", prog);
        eprintln!("  rebuild              re-index the corpus and publish a new generation");
        eprintln!("  resolve \"<ticket>\"   resolve one support ticket (--report for warnings)");
        eprintln!("  stats                show index statistics");
        eprintln!("  --force-rebuild      ignore the persisted snapshot at startup");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let mut settings = config.settings()?;
    let (cmd, mut args) = parse_args();

    let force = args.iter().any(|a| a == "--force-rebuild");
    let report = args.iter().any(|a| a == "--report");
    args.retain(|a| !a.starts_with("--"));
    let mode = if force { StartupMode::ForceRebuild } else { StartupMode::LoadOrBuild };
    info!(command = %cmd, ?mode, docs = %settings.corpus.docs_dir.display(), "starting");

    match cmd.as_str() {
        "rebuild" => {
            settings.rebuild.show_progress = true;
            let assistant = KnowledgeAssistant::open_default(settings, StartupMode::ForceRebuild).await?;
            let stats = assistant.stats();
            println!("✅ Rebuilt knowledge base: generation {} with {} chunks", stats.generation, stats.chunk_count);
        }
        "resolve" => {
            let ticket = args.join(" ");
            if ticket.trim().is_empty() {
                eprintln!("Usage: kbase resolve \"<ticket text>\"");
                std::process::exit(1);
            }
            let assistant = KnowledgeAssistant::open_default(settings, mode).await?;
            if report {
                let r = assistant.resolve_ticket_report(&ticket).await?;
                println!("{}", serde_json::to_string_pretty(&r)?);
            } else {
                let r = assistant.resolve_ticket(&ticket).await?;
                println!("{}", serde_json::to_string_pretty(&r)?);
            }
        }
        "stats" => {
            let assistant = KnowledgeAssistant::open_default(settings, mode).await?;
            println!("{}", serde_json::to_string_pretty(&assistant.stats())?);
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            std::process::exit(1);
        }
    }
    Ok(())
}
