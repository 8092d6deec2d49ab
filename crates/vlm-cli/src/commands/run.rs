//! `vlm-worker run`

use colored::Colorize;
use vlm_kernel::{InferenceRequest, StatusEvent, WorkerConfig, WorkerEvent};
use vlm_worker::{CapabilityProbe, EventSink, Router};

/// Load, warm up, run one request and print what the host would see.
pub async fn run(
    config: WorkerConfig,
    task: String,
    text: String,
    image: String,
    json: bool,
) -> anyhow::Result<()> {
    let runtime = super::build_runtime(&config)?;
    let probe = CapabilityProbe::from_config(&config.probe);
    let (sink, mut events) = EventSink::channel();
    let router = Router::from_config(&config, runtime, probe, sink);

    router.load().await;
    router.run(InferenceRequest::new(task, text, image)).await;

    let mut failure = None;
    while let Ok(event) = events.try_recv() {
        if json {
            println!("{}", event.to_json()?);
        } else {
            print_event(&event);
        }
        if let WorkerEvent::Status(StatusEvent::Error { stage, message }) = event {
            failure.get_or_insert(format!("{stage} failed: {message}"));
        }
    }

    match failure {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

fn print_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::Status(StatusEvent::Loading { data }) => eprintln!("{}", data.dimmed()),
        WorkerEvent::Status(StatusEvent::Ready) => eprintln!("{}", "Model ready".green()),
        WorkerEvent::Status(StatusEvent::Complete { result, time }) => {
            for text in result {
                println!("{text}");
            }
            eprintln!("{}", format!("({time:.1} ms)").dimmed());
        }
        WorkerEvent::Status(StatusEvent::Error { stage, message }) => {
            eprintln!("{} {message}", format!("{stage} error:").red().bold());
        }
        WorkerEvent::Status(StatusEvent::Cancelled) => eprintln!("{}", "cancelled".yellow()),
        WorkerEvent::Progress(progress) => {
            tracing::debug!(event = %serde_json::Value::Object(progress.as_map().clone()), "load progress");
        }
    }
}
