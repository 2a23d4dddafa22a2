mod cli;
mod error;
mod model;
mod pipeline;
mod video;
mod web;

use anyhow::{Context, Result};
use cli::{build_analyzer, AnalyzeArgs, Args, Command};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::aggregator::ScanEvent;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command {
        Command::Serve(serve) => run_server(serve).await?,
        Command::Analyze(analyze) => {
            tokio::task::spawn_blocking(move || run_analyze(analyze))
                .await
                .context("Analysis task panicked")??;
        }
    }

    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let analyzer = build_analyzer(&args.model, &args.scan);

    if args.legacy_output {
        let message = analyzer
            .analyze_legacy(&args.video)
            .with_context(|| format!("Failed to analyze {}", args.video.display()))?;
        println!("{}", message);
        return Ok(());
    }

    let pb = ProgressBar::hidden();
    let report = analyzer
        .analyze_observed(&args.video, |event| match event {
            ScanEvent::Opened { frame_count_hint } => {
                pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                match frame_count_hint {
                    Some(total) => pb.set_length(total as u64),
                    None => pb.unset_length(),
                }
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta}) {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
            }
            ScanEvent::Frame { .. } => {
                if let Some(message) = event.progress_message() {
                    pb.set_message(message);
                }
                pb.inc(1);
            }
        })
        .with_context(|| format!("Failed to analyze {}", args.video.display()))?;
    pb.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.message);
    }

    Ok(())
}
