//! Standalone binary to validate a dispatch configuration file.
//! Prints the resolved settings of every backend; exits non-zero on the first problem.

use anyhow::Context;
use babel_dispatch::config::{AppConfig, DispatchConfig};
use babel_dispatch::telemetry::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BABEL_CONFIG").ok())
        .context("usage: validate-config <config.yaml> (or set BABEL_CONFIG)")?;

    let cfg = AppConfig::load(&path)
        .await
        .with_context(|| format!("invalid configuration: {}", path))?;
    init_logging(&cfg.log_level)?;
    tracing::debug!(path = %path, "configuration validated");

    println!("Configuration: {}", path);
    println!("Log level: {}", cfg.log_level);
    print_dispatch("translation", &cfg.translation);
    match &cfg.detection {
        Some(detection) => print_dispatch("detection", detection),
        None => println!("\n=== detection ===\n  (not configured)"),
    }
    if let Some(source) = &cfg.source_language {
        println!(
            "\nSource languages: {} (confidence >= {})",
            source.langs.join(", "),
            source.confidence_threshold
        );
    }

    println!("\n✅ configuration is valid");
    Ok(())
}

fn print_dispatch(section: &str, cfg: &DispatchConfig) {
    println!("\n=== {} ===", section);
    println!(
        "  selector: {}, max retries: {}, retry cooldown: {}s",
        cfg.selector, cfg.max_retries, cfg.retry_cooldown_secs
    );
    for (backend, settings) in cfg.resolved_backends() {
        let rate_limit = match &settings.rate_limit {
            Some(rl) if rl.is_effective() => format!(
                "bucket {} @ {}/s",
                rl.bucket_size, rl.refill_per_sec
            ),
            _ => "off".to_string(),
        };
        println!(
            "  - {} ({}): weight {}, timeout {:?}, failover {}/{}s/{}, rate limit {}",
            backend.name,
            backend.kind,
            settings.weight,
            settings.timeout,
            settings.failover.max_failures,
            settings.failover.cooldown_base_secs,
            settings.failover.max_disable_cycles,
            rate_limit
        );
    }
}
