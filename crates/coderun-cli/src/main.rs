//! Coderun CLI
//!
//! Serves the compile-and-run HTTP interface, or runs a single file through
//! the same pipeline from the command line.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coderun::{Config, EXAMPLE_CONFIG, Pipeline, PipelineResult, ResourceLimits, Server};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderun")]
#[command(about = "A local service for compiling and running code snippets")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen address (must be loopback)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Compile and run a single source file
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Input file (default: empty input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Run timeout in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Memory limit in KB
        #[arg(short, long)]
        memory_limit: Option<u64>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path (default: coderun.toml)
        #[arg(short, long, default_value = "coderun.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Run {
            source,
            input,
            timeout,
            memory_limit,
        } => run_file(config, &source, input.as_deref(), timeout, memory_limit).await,
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn serve(mut config: Config, bind: Option<SocketAddr>) -> Result<()> {
    if let Some(addr) = bind {
        anyhow::ensure!(
            addr.ip().is_loopback(),
            "refusing to listen on non-loopback address {addr}"
        );
        config.server.bind = addr.to_string();
    }

    let server = Server::new(config);
    let listener = server.bind().await.context("failed to start server")?;

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("server failed")?;

    info!("server stopped");
    Ok(())
}

async fn run_file(
    mut config: Config,
    source: &Path,
    input: Option<&Path>,
    timeout: Option<f64>,
    memory_limit: Option<u64>,
) -> Result<()> {
    let source_content = tokio::fs::read(source)
        .await
        .context("failed to read source file")?;

    let input_data = match input {
        Some(path) => tokio::fs::read(path)
            .await
            .context("failed to read input file")?,
        None => Vec::new(),
    };

    // Only explicitly-specified values override the configured ones
    if let Some(seconds) = timeout {
        anyhow::ensure!(
            seconds.is_finite() && seconds > 0.0,
            "timeout must be a positive number of seconds"
        );
        config.toolchain.run.timeout = seconds;
    }
    if let Some(kb) = memory_limit {
        let limits = config
            .toolchain
            .run
            .limits
            .get_or_insert_with(ResourceLimits::none);
        limits.memory_limit = Some(kb);
    }

    info!(toolchain = %config.toolchain.name, "running program");

    let pipeline = Pipeline::new(config);
    let result = pipeline
        .run(&source_content, &input_data)
        .await
        .context("failed to run program")?;

    match result {
        PipelineResult::CompileFailed { output } => {
            eprintln!("Compilation failed:");
            std::io::stderr().write_all(&output)?;
            std::process::exit(1);
        }
        PipelineResult::Completed {
            exit_status,
            timed_out,
            output,
        } => {
            std::io::stdout().write_all(&output)?;
            std::io::stdout().flush()?;

            // Keep stdout clean for piping
            info!(exit_status, timed_out, "execution result");

            if exit_status != 0 {
                std::process::exit(exit_status);
            }
            Ok(())
        }
    }
}

fn show_config(config: &Config) {
    let server = &config.server;
    println!("Server:");
    println!("  Bind: {}", server.bind);
    println!("  Max request bytes: {}", server.max_request_bytes);
    println!("  Read timeout: {:?}", server.read_timeout());
    println!("  Static dir: {}", server.static_dir.display());
    println!("  Snippets dir: {}", server.snippets_dir.display());
    println!("  Max concurrent runs: {}", server.max_concurrent_runs);
    println!("  Cancel on disconnect: {}", server.cancel_on_disconnect);
    println!();

    let toolchain = &config.toolchain;
    println!("Toolchain: {} (.{})", toolchain.name, toolchain.extension);
    println!("  Compile: {}", toolchain.compile.command.join(" "));
    println!("  Compile timeout: {:?}", toolchain.compile.timeout());
    println!("  Run: {}", toolchain.run.command.join(" "));
    println!("  Run timeout: {:?}", toolchain.run.timeout());
    println!("  Run PATH: {}", toolchain.run.path);
    println!();

    let limits = toolchain.run_limits();
    println!("Run limits:");
    println!("  CPU time: {:?} s", limits.cpu_time);
    println!("  Memory limit: {:?} KB", limits.memory_limit);
    println!("  Max file size: {:?} KB", limits.max_file_size);
    println!("  Max open files: {:?}", limits.max_open_files);
    println!();
    println!("Max output: {} bytes", config.max_output);
    println!("Scratch dir: {}", config.scratch_dir().display());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
