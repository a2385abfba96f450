use anyhow::{Context, Result};
use clap::Parser;
use code_explainer::{CodeExplainer, Config, ExplainError, KnowledgeStore, Query};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Explain a code snippet using similar annotated examples.
#[derive(Parser, Debug)]
#[command(name = "code-explainer", version)]
struct Cli {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Knowledge base JSON file (overrides config)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Language of the snippet, if known
    #[arg(short, long)]
    language: Option<String>,

    /// Number of examples to retrieve (overrides config)
    #[arg(long)]
    top_k: Option<usize>,

    /// Read snippets from a prompt until EOF
    #[arg(short, long)]
    interactive: bool,

    /// File to explain; stdin when omitted
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::read(cli.config.as_deref())?;
    if let Some(data) = cli.data {
        config.knowledge_base = data;
    }
    if let Some(top_k) = cli.top_k {
        config.retrieval.top_k = top_k;
    }
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("code_explainer={}", config.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    info!(
        "Configuration loaded (knowledge base {}, top_k {})",
        config.knowledge_base.display(),
        config.retrieval.top_k
    );

    let explainer = startup(&config).await?;

    if cli.interactive {
        return interactive(&explainer, cli.language.as_deref()).await;
    }

    let code = match &cli.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    match explainer.explain(&Query::new(code, cli.language.as_deref())).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            print_error(&e)?;
            std::process::exit(1);
        }
    }
}

/// Loads and embeds the knowledge base before any request is accepted.
async fn startup(config: &Config) -> Result<CodeExplainer> {
    info!("Loading knowledge base from {}", config.knowledge_base.display());
    let mut store = KnowledgeStore::load_file(&config.knowledge_base)
        .context("Failed to load knowledge base")?;

    let embedder = config.build_embedder();
    let computed = store
        .ensure_embeddings(embedder.as_ref())
        .await
        .context("Failed to embed knowledge base")?;
    info!("Knowledge base ready: {} examples ({} newly embedded)", store.len(), computed);

    let explainer = CodeExplainer::new(
        Arc::new(store),
        embedder,
        config.build_generator(),
        config.settings(),
    )?;
    Ok(explainer)
}

async fn interactive(explainer: &CodeExplainer, language: Option<&str>) -> Result<()> {
    println!("Code explainer ready. Paste a snippet and finish it with an empty line (Ctrl+D to exit)");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut snippet = String::new();
        let mut eof = false;
        loop {
            let mut line = String::new();
            if io::stdin().read_line(&mut line)? == 0 {
                eof = true;
                break;
            }
            if line.trim().is_empty() && !snippet.is_empty() {
                break;
            }
            snippet.push_str(&line);
        }

        if !snippet.trim().is_empty() {
            match explainer.explain(&Query::new(snippet, language)).await {
                Ok(response) => println!("{}\n", serde_json::to_string_pretty(&response)?),
                Err(e) => {
                    error!("Request failed: {e}");
                    print_error(&e)?;
                }
            }
        }

        if eof {
            break;
        }
    }

    Ok(())
}

fn print_error(e: &ExplainError) -> Result<()> {
    eprintln!("{}", serde_json::to_string_pretty(&e.to_body())?);
    Ok(())
}
