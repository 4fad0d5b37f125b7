//! Main entry point for animedl CLI

use animedl::cli::args::EngineKind;
use animedl::cli::output::{create_batch_callback, create_progress_callback, OutputFormatter};
use animedl::cli::Args;
use animedl::core::{BatchDownloader, Downloader};
use animedl::download::{HttpEngine, TransferEngine, YtDlpEngine};
use animedl::platform::{ExtractorRegistry, PageClient};
use animedl::utils::{create_sample_urls_file, load_urls_from_file};
use anyhow::{anyhow, Context};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;
    debug!("Starting animedl with args: {:?}", args);

    let code = run(args).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let mut formatter = OutputFormatter::new(args.verbosity_level());

    // Handle special commands
    if let Some(path) = &args.create_sample {
        create_sample_urls_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
        formatter.success(&format!("Sample URL file written to {}", path.display()));
        return Ok(0);
    }

    let client = Arc::new(PageClient::with_config(args.http_client_config())?);
    let registry = Arc::new(ExtractorRegistry::with_builtin(
        client,
        &args.disable_extractor,
    ));

    if args.list_extractors {
        if args.json {
            formatter.print_json(&registry.list())?;
        } else {
            formatter.print_extractors(&registry.list());
        }
        return Ok(0);
    }

    let urls: Vec<String> = match (&args.file, &args.url) {
        (Some(path), None) => load_urls_from_file(path)?
            .into_iter()
            .map(|u| u.to_string())
            .collect(),
        (None, Some(url)) => vec![url.clone()],
        (Some(_), Some(_)) => return Err(anyhow!("give either a URL or --file, not both")),
        (None, None) => {
            formatter.print_help();
            return Ok(0);
        }
    };
    if urls.is_empty() {
        formatter.warning("No valid URLs to download");
        return Ok(1);
    }

    let options = args.download_options().map_err(|e| anyhow!(e))?;
    options.validate()?;

    let engine: Arc<dyn TransferEngine> = match args.engine {
        EngineKind::Ytdlp => Arc::new(YtDlpEngine::new(args.ytdlp_path.clone())),
        EngineKind::Http => Arc::new(HttpEngine::new(&args.http_client_config())?),
    };
    info!("Using {} transfer engine", engine.name());

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut downloader = Downloader::new(registry, engine)
        .with_options(options)
        .with_cancellation(cancel);

    // Info mode
    if args.info {
        for url in &urls {
            let (extractor, extraction) = downloader.resolve(url).await?;
            if args.json {
                formatter.print_json(&extraction)?;
            } else {
                formatter.print_extraction(&extractor, &extraction);
            }
        }
        return Ok(0);
    }

    let show_progress = !args.no_progress && !args.json;
    let output_dir = downloader.options().output_dir.display().to_string();

    if !args.is_batch() {
        let url = &urls[0];
        if show_progress {
            formatter.create_progress_bar(0);
        }
        let formatter = Arc::new(formatter);
        if show_progress {
            downloader = downloader.with_progress(create_progress_callback(formatter.clone()));
        }

        if !args.json {
            formatter.print_download_start(url, &output_dir);
        }
        let result = downloader.download_url(url).await;
        formatter.finish_progress(if result.success { "done" } else { "failed" });

        if args.json {
            formatter.print_json(&result)?;
        } else {
            formatter.print_result(&result);
        }
        return Ok(if result.success { 0 } else { 1 });
    }

    // Batch
    let mode = args.batch_mode()?;
    if !args.json {
        formatter.print_batch_start(urls.len(), mode.workers(), &output_dir);
    }
    if show_progress {
        formatter.create_batch_bar(urls.len() as u64);
    }
    let formatter = Arc::new(formatter);

    let mut batch = BatchDownloader::new(Arc::new(downloader)).with_mode(mode);
    if show_progress {
        batch = batch.with_callback(create_batch_callback(formatter.clone()));
    }

    let summary = batch.run(&urls).await;
    formatter.finish_progress("batch finished");

    if args.json {
        formatter.print_json(&summary)?;
    } else {
        formatter.print_summary(&summary);
    }
    Ok(summary.exit_code())
}

/// Cancel outstanding work on Ctrl-C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current attempt");
            cancel.cancel();
        }
    });
}

/// Initialize logging system
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let default_level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {}", e))?;

    Ok(())
}
