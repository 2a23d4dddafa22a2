use crate::cli::{build_analyzer, ServeArgs};
use crate::web::api::{router, AppState};
use anyhow::{Context, Result};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_PORT_ATTEMPTS: u16 = 10;

pub async fn run_server(args: ServeArgs) -> Result<()> {
    let mut current_port = args.port;
    let mut attempts = 0;
    let listener = loop {
        let addr = SocketAddr::new(args.host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Must be non-blocking before handing it to Tokio.
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_PORT_ATTEMPTS || current_port == u16::MAX {
                    return Err(e).context(format!("Failed to bind near port {}", args.port));
                }
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port += 1;
            }
        }
    };

    let scratch_dir = args.scratch_dir.clone().unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&scratch_dir)
        .with_context(|| format!("Failed to create scratch dir {}", scratch_dir.display()))?;

    let analyzer = build_analyzer(&args.model, &args.scan);
    info!(
        "Model: {} (device={:?}, policy={:?}); frame interval {}, backend {:?}",
        args.model.model_path.display(),
        args.model.device,
        args.model.model_policy,
        args.scan.frame_interval,
        args.scan.backend
    );

    let state = Arc::new(AppState {
        analyzer: Arc::new(analyzer),
        scratch_dir,
        strict_errors: args.strict_errors,
    });
    let app = router(state, args.max_upload_mb * 1024 * 1024);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Panting detection server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app)
        .await
        .context("Server terminated")?;

    Ok(())
}
