//! `vlm-worker serve`

use tokio::io::BufReader;
use vlm_kernel::WorkerConfig;
use vlm_worker::{CapabilityProbe, EventSink, Router, serve_json_lines};

pub async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let runtime = super::build_runtime(&config)?;
    let probe = CapabilityProbe::from_config(&config.probe);
    let (sink, events) = EventSink::channel();
    let router = Router::from_config(&config, runtime, probe, sink);

    tracing::info!(model = %config.model.id, "serving JSON lines on stdin/stdout");
    serve_json_lines(
        router,
        events,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;
    tracing::info!("input closed, shutting down");
    Ok(())
}
