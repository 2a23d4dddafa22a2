use crate::model::{ComputeDevice, ModelPolicy, ModelSpec, ModelStore, DEFAULT_MODEL_PATH};
use crate::pipeline::aggregator::{ScanOptions, VideoAnalyzer};
use crate::video::ReaderBackend;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect panting dogs in videos", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Analyze a single local video and print the verdict
    Analyze(AnalyzeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ModelArgs {
    /// Trained weights (.pth state dict or .safetensors)
    #[arg(long, env = "PANTING_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Compute backend for inference
    #[arg(long, env = "PANTING_DEVICE", value_enum, default_value_t = ComputeDevice::Auto)]
    pub device: ComputeDevice,

    /// Reload weights per analysis, or load once and share
    #[arg(long, env = "PANTING_MODEL_POLICY", value_enum, default_value_t = ModelPolicy::Reload)]
    pub model_policy: ModelPolicy,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScanArgs {
    /// Classify every Nth frame
    #[arg(
        long,
        env = "PANTING_FRAME_INTERVAL",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub frame_interval: u64,

    /// Video decoding backend
    #[arg(long, env = "PANTING_READER_BACKEND", value_enum, default_value_t = ReaderBackend::Opencv)]
    pub backend: ReaderBackend,

    /// Stop scanning at the first panting frame
    #[arg(long, env = "PANTING_STOP_ON_FIRST_POSITIVE")]
    pub stop_on_first_positive: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, env = "PANTING_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, env = "PANTING_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Largest accepted upload, in megabytes
    #[arg(long, env = "PANTING_MAX_UPLOAD_MB", default_value_t = 100)]
    pub max_upload_mb: usize,

    /// Directory for uploaded videos while they are analyzed
    #[arg(long, env = "PANTING_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Answer 422 when a video can't be opened, instead of 200 with the
    /// legacy error string
    #[arg(long, env = "PANTING_STRICT_ERRORS")]
    pub strict_errors: bool,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Video file to analyze
    pub video: PathBuf,

    /// Print the full report as JSON
    #[arg(long, conflicts_with = "legacy_output")]
    pub json: bool,

    /// Print only the verdict string, or the open-failure sentinel when the
    /// video can't be read
    #[arg(long)]
    pub legacy_output: bool,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub scan: ScanArgs,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ModelArgs {
    pub fn store(&self) -> ModelStore {
        ModelStore::new(
            ModelSpec {
                weights_path: self.model_path.clone(),
                device: self.device,
            },
            self.model_policy,
        )
    }
}

impl ScanArgs {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            frame_interval: self.frame_interval as usize,
            backend: self.backend,
            stop_on_first_positive: self.stop_on_first_positive,
        }
    }
}

pub fn build_analyzer(model: &ModelArgs, scan: &ScanArgs) -> VideoAnalyzer {
    VideoAnalyzer::new(Arc::new(model.store()), scan.options())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let args = Args::try_parse_from(["panting-detect", "serve"]).unwrap();
        let Command::Serve(serve) = args.command else {
            panic!("expected serve");
        };
        assert_eq!(serve.port, 5000);
        assert_eq!(serve.max_upload_mb, 100);
        assert!(!serve.strict_errors);
        assert_eq!(serve.model.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(serve.model.device, ComputeDevice::Auto);
        assert_eq!(serve.model.model_policy, ModelPolicy::Reload);

        let options = serve.scan.options();
        assert_eq!(options.frame_interval, 1);
        assert_eq!(options.backend, ReaderBackend::Opencv);
        assert!(!options.stop_on_first_positive);
    }

    #[test]
    fn test_analyze_options() {
        let args = Args::try_parse_from([
            "panting-detect",
            "analyze",
            "clip.mp4",
            "--frame-interval",
            "5",
            "--backend",
            "ffmpeg",
            "--device",
            "cpu",
            "--model-policy",
            "shared",
            "--json",
        ])
        .unwrap();
        let Command::Analyze(analyze) = args.command else {
            panic!("expected analyze");
        };
        assert_eq!(analyze.video, PathBuf::from("clip.mp4"));
        assert!(analyze.json);
        assert!(!analyze.legacy_output);
        assert_eq!(analyze.scan.options().frame_interval, 5);
        assert_eq!(analyze.scan.backend, ReaderBackend::Ffmpeg);
        assert_eq!(analyze.model.device, ComputeDevice::Cpu);
        assert_eq!(analyze.model.model_policy, ModelPolicy::Shared);
    }

    #[test]
    fn test_json_and_legacy_output_conflict() {
        let result = Args::try_parse_from([
            "panting-detect",
            "analyze",
            "clip.mp4",
            "--json",
            "--legacy-output",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_frame_interval_is_rejected() {
        let result = Args::try_parse_from([
            "panting-detect",
            "analyze",
            "clip.mp4",
            "--frame-interval",
            "0",
        ]);
        assert!(result.is_err());
    }
}
