use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rmcp::{ServiceExt, transport::stdio};
use tokio::sync::RwLock;
use guia::config::AgentPaths;
use guia::document::{QuartoParser, DEFAULT_BASE_URL};
use guia::evaluation::{run_full_evaluation, AnthropicClient, TestDataset, DEFAULT_MODEL};
use guia::github::GitHubSource;
use guia::linkcheck::{LinkCheckConfig, LinkChecker};
use guia::mcp_config::{self, McpClientConfig};
use guia::server::GuidesServer;
use guia::storage::{MetadataFilter, MetadataValue, DEFAULT_BATCH_SIZE};

#[cfg(feature = "trace")]
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version, about = "Documentation assistant for the DCC guides")]
struct Cli {
    /// Agent working directory holding the index and server log
    #[clap(long, global = true, env = "GUIA_DIRECTORY", default_value = ".")]
    directory: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse the documentation and (re)build the index
    BuildIndex {
        /// Local documentation directory
        #[clap(long, env = "GUIA_DOCS_PATH")]
        docs: Option<PathBuf>,
        /// A github repository to read documentation from instead of --docs
        #[clap(long)]
        github_repo: Option<String>,
        /// A github repository owner
        #[clap(long, default_value = "tu-delft-dcc")]
        github_owner: String,
        /// A github repository subfolder holding the documentation
        #[clap(long, default_value = "docs")]
        github_subfolder: String,
        /// A github personal access token to use for authentication (optional)
        #[clap(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_pat: Option<String>,
        /// URL of the rendered site, used for section links
        #[clap(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
        #[clap(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Add to the existing index instead of replacing it
        #[clap(long)]
        keep_existing: bool,
    },
    /// Run the MCP server on stdio
    Serve,
    /// Query the index
    Search {
        query: String,
        #[clap(long, default_value_t = 3)]
        n_results: usize,
        /// Restrict results to one file
        #[clap(long)]
        file: Option<String>,
    },
    /// Show index statistics
    Stats,
    /// Check links in markdown, Quarto and HTML files
    CheckLinks {
        /// Files or directories to scan
        #[clap(default_value = ".")]
        inputs: Vec<PathBuf>,
        /// Link checker configuration (defaults to ./lychee.toml when present)
        #[clap(long)]
        config: Option<PathBuf>,
        /// Skip remote links
        #[clap(long)]
        offline: bool,
        /// Exit successfully even when links are broken
        #[clap(long)]
        no_fail: bool,
        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the client configuration registering this server, or merge it into a file
    McpConfig {
        /// Executable the client launches (defaults to this binary)
        #[clap(long)]
        command: Option<String>,
        /// Client configuration file to update
        #[clap(long)]
        install: Option<PathBuf>,
    },
    /// Evaluate retrieval and answer quality
    Evaluate {
        #[clap(long, default_value = "test_dataset.json")]
        test_data: PathBuf,
        #[clap(long, default_value = "evaluation_results")]
        output_dir: PathBuf,
        /// API key enabling end-to-end answer evaluation
        #[clap(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[clap(long, default_value = DEFAULT_MODEL)]
        model: String,
        /// Write a sample dataset to --test-data first
        #[clap(long)]
        create_sample: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Exit status when the link checker finds broken links
const BROKEN_LINKS_EXIT: u8 = 2;

/// You can inspect the server using the Model Context Protocol Inspector.
/// npx @modelcontextprotocol/inspector cargo run -- serve

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    let paths = AgentPaths::new(&args.directory);

    // The protocol owns stdout while serving, so server logs go to a file
    match args.command {
        Command::Serve => init_tracing(Some(&paths.log_file()))?,
        _ => init_tracing(None)?,
    }

    match args.command {
        Command::BuildIndex {
            docs,
            github_repo,
            github_owner,
            github_subfolder,
            github_pat,
            base_url,
            batch_size,
            keep_existing,
        } => {
            let parser = QuartoParser::new(docs.clone().unwrap_or_default()).with_base_url(&base_url);

            let chunks = match github_repo {
                Some(repo) => {
                    let source = GitHubSource::new(&github_owner, &repo, github_pat.as_deref())?;
                    tracing::info!("Reading {}/{} from GitHub, folder '{}'", github_owner, repo, github_subfolder);
                    let sources = source.list_sources(&github_subfolder, &parser).await?;
                    sources.iter().flat_map(|s| parser.parse_source(s)).collect::<Vec<_>>()
                }
                None => {
                    let docs = docs.context("either --docs or --github-repo is required")?;
                    println!("Parsing documentation in {}", docs.display());
                    parser.parse_all_files()?
                }
            };
            println!("Found {} documentation chunks", chunks.len());

            let mut index = paths.open_index()?;
            if !keep_existing {
                index.reset()?;
            }
            index.index_chunks(&chunks, batch_size)?;

            let stats = index.stats();
            println!("Index built successfully");
            println!("    Total chunks: {}", stats.total_chunks);
            println!("    Total files:  {}", stats.total_files);
            println!("    Stored in:    {}", index.index_dir().display());
        }
        Command::Serve => {
            let index = paths.open_index()?;
            if index.is_empty() {
                tracing::warn!("Index at {} is empty, run build-index first", paths.index_dir().display());
            }
            tracing::info!("Starting DCC guides MCP server with {} chunks", index.count());

            let service = GuidesServer::new(Arc::new(RwLock::new(index)))
                .serve(stdio()).await.inspect_err(|e| {
                    tracing::error!("serving error: {:?}", e);
                })?;

            tokio::select! {
                result = service.waiting() => {
                    result?;
                    tracing::info!("Client disconnected");
                }
                _ = shutdown_signal() => {
                    tracing::info!("Shutting down DCC guides MCP server");
                }
            }
        }
        Command::Search { query, n_results, file } => {
            let index = paths.open_index()?;
            let filter = file.map(|file| {
                let key = if file.contains('/') { "file" } else { "file_name" };
                MetadataFilter::from([(key.to_string(), MetadataValue::from(file))])
            });

            let hits = index.search(&query, n_results, filter.as_ref());
            if hits.is_empty() {
                println!("No results");
            }
            for (i, hit) in hits.iter().enumerate() {
                let preview: String = hit.document.chars().take(200).collect();
                println!("\nResult {} (score {:.3}):", i + 1, hit.relevance_score());
                println!("File: {}", hit.meta_str("file"));
                println!("Section: {}", hit.meta_str("section_header"));
                println!("Link: {}", hit.meta_str("section_uri"));
                println!("Content preview: {preview}...");
            }
        }
        Command::Stats => {
            let index = paths.open_index()?;
            println!("{}", serde_json::to_string_pretty(&index.stats())?);
        }
        Command::CheckLinks {
            inputs,
            config,
            offline,
            no_fail,
            format,
        } => {
            let mut config = LinkCheckConfig::resolve(config.as_deref())?;
            config.offline |= offline;

            let checker = LinkChecker::new(config)?;
            let report = checker.run(&inputs).await?;

            match format {
                OutputFormat::Text => print!("{}", report.summary()),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }

            if !report.is_success() && !no_fail {
                return Ok(ExitCode::from(BROKEN_LINKS_EXIT));
            }
        }
        Command::McpConfig { command, install } => {
            let command = match command {
                Some(command) => command,
                None => std::env::current_exe()?.display().to_string(),
            };
            let directory = std::path::absolute(paths.directory())?;
            let entry = mcp_config::guides_entry(&command, &directory);

            match install {
                Some(path) => {
                    let config = mcp_config::install(&path, entry)?;
                    mcp_config::validate_guides(&config, &directory)?;
                    println!("Registered '{}' in {}", mcp_config::SERVER_NAME, path.display());
                }
                None => println!("{}", McpClientConfig::for_guides(entry).to_json()?),
            }
        }
        Command::Evaluate {
            test_data,
            output_dir,
            api_key,
            model,
            create_sample,
        } => {
            if create_sample {
                TestDataset::sample().save(&test_data)?;
                println!("Sample dataset saved to {}", test_data.display());
            }

            let index = paths.open_index()?;
            let dataset = TestDataset::load(&test_data)?;
            println!("Loaded {} test cases", dataset.test_cases.len());

            let client = match api_key {
                Some(key) => Some(AnthropicClient::new(&key)?.with_model(&model)),
                None => None,
            };

            let summary = run_full_evaluation(&index, &dataset, &output_dir, client).await?;

            let metrics = &summary.retrieval.aggregated_metrics.metrics;
            println!("\nRetrieval metrics (averaged across {} queries):", dataset.test_cases.len());
            for name in ["precision@3", "recall@3", "ndcg@3", "mrr"] {
                if let Some(m) = metrics.get(name) {
                    println!("  {:<12} {:.3} ± {:.3}", name, m.mean, m.std);
                }
            }
            if let Some(answers) = summary.answers.as_ref().filter(|a| !a.is_empty()) {
                let n = answers.len() as f64;
                let coverage = answers.iter().map(|a| a.keyword_evaluation.keyword_coverage).sum::<f64>() / n;
                let judge = answers.iter().map(|a| a.llm_judge.overall()).sum::<f64>() / n;
                println!("\nEnd-to-end metrics:");
                println!("  Keyword coverage: {:.1}%", coverage * 100.0);
                println!("  Judge score:      {judge:.2}/5.0");
            }
            if let Some(perf) = &summary.performance {
                println!("\nPerformance ({} queries):", perf.total_calls);
                println!("  Avg latency: {:.1}ms", perf.latency.mean * 1000.0);
                println!("  P95 latency: {:.1}ms", perf.latency.p95 * 1000.0);
                println!("  Max latency: {:.1}ms", perf.latency.max * 1000.0);
            }
            println!("\nResults saved to {}", output_dir.display());
            for file in &summary.files {
                println!("  - {}", file.display());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(feature = "trace")]
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            builder.with_writer(file).with_ansi(false).init()
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[cfg(not(feature = "trace"))]
fn init_tracing(_log_file: Option<&Path>) -> Result<()> {
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
