//! `vlm-worker probe`

use colored::Colorize;
use vlm_kernel::WorkerConfig;
use vlm_worker::probe::SHADER_F16;
use vlm_worker::{AdapterStatus, CapabilityProbe};

/// Print the GPU adapter, its fp16 support and the precision a load would use.
pub async fn run(config: &WorkerConfig) -> anyhow::Result<()> {
    let probe = CapabilityProbe::from_config(&config.probe);
    let report = probe.report().await;

    match &report.adapter {
        AdapterStatus::Forced => println!("{:<16} forced by config", "adapter:".bold()),
        AdapterStatus::Found(adapter) => println!("{:<16} {}", "adapter:".bold(), adapter.name),
        AdapterStatus::Missing => println!("{:<16} {}", "adapter:".bold(), "none".yellow()),
        AdapterStatus::Unavailable(reason) => {
            println!("{:<16} {} ({reason})", "adapter:".bold(), "unavailable".yellow())
        }
    }

    let flag = if report.supports_fp16 {
        "yes".green()
    } else {
        "no".red()
    };
    println!("{:<16} {flag}", format!("{SHADER_F16}:").bold());

    let policy = config.model.precision_policy;
    let precision = policy.resolve(config.model.precision, report.supports_fp16);
    println!("{:<16} {policy:?}", "policy:".bold());
    for (module, level) in precision.entries() {
        println!("  {module:<24} {level}");
    }
    Ok(())
}
