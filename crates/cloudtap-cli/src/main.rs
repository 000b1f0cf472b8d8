//! `cloudtap` – live point cloud tap.
//!
//! This binary:
//!
//! 1. Loads `~/.cloudtap/config.toml`, writing the defaults on first run.
//! 2. Subscribes to the configured topic on an in-process loopback session
//!    fed by a synthetic publisher.
//! 3. Streams every decoded batch and status notification to stdout as
//!    newline-delimited JSON.
//! 4. Intercepts **Ctrl-C** to raise the subscriber's terminate condition and
//!    exit cleanly with a run summary on stderr.

mod config;
mod ndjson;
mod synth;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use colored::Colorize;
use tracing::{error, info, warn};

use cloudtap_middleware::{BusSink, DispatchStats, EventBus, Loopback, Topic};
use cloudtap_runtime::{SubscriptionManager, init_tracing};

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // Logs go to stderr; stdout carries NDJSON only.
    let _telemetry = init_tracing("cloudtap");

    print_banner();
    let cfg = load_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    // ── Output ────────────────────────────────────────────────────────────
    let bus = EventBus::default();
    let writer = runtime.spawn(ndjson::forward_events(
        bus.subscribe_to(Topic::PointClouds),
        bus.subscribe_to(Topic::Status),
        tokio::io::stdout(),
    ));

    // ── Subscription ──────────────────────────────────────────────────────
    let loopback = Loopback::new();
    let mut manager = SubscriptionManager::new(Arc::new(loopback.clone()), cfg.dispatch_config());
    if let Err(e) = manager.subscribe(&cfg.topic, BusSink::new(bus, "cloudtap-middleware::dispatch")) {
        eprintln!("{}: {e}", "Subscription failed".red().bold());
        return ExitCode::FAILURE;
    }
    eprintln!("  Subscribed to {}", cfg.topic.bold());

    let publisher = match synth::SyntheticPublisher::start(
        loopback.topic(&cfg.topic),
        cfg.synthetic_rate_hz,
        cfg.synthetic_points,
    ) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {e}", "Synthetic publisher failed".red().bold());
            manager.unsubscribe_all();
            return ExitCode::FAILURE;
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    let guards = manager.terminate_conditions();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – stopping subscriber …".yellow().bold());
        for guard in &guards {
            guard.set_trigger_value(true);
        }
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process with SIGKILL");
    }

    while !shutdown.load(Ordering::SeqCst) && !manager.any_finished() {
        thread::sleep(Duration::from_millis(100));
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    let frames = publisher.stop();
    let outcomes = manager.unsubscribe_all();

    match runtime.block_on(writer) {
        Ok(Ok(lines)) => info!(lines, "output stream closed"),
        Ok(Err(e)) => warn!(error = %e, "output stream failed"),
        Err(e) => warn!(error = %e, "output task aborted"),
    }

    let mut failed = false;
    for (topic, outcome) in outcomes {
        match outcome {
            Ok(stats) => print_summary(&topic, frames, &stats),
            Err(e) => {
                failed = true;
                eprintln!("  {} {}: {e}", "✗".red().bold(), topic.bold());
            }
        }
    }
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

/// Load the config vault, writing defaults on first run.
fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            eprintln!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => eprintln!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => eprintln!("{}: {e}", "Error saving config".red()),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            eprintln!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    eprintln!();
    eprintln!("{}", r#"   ____ _                 _ _              "#.bold().cyan());
    eprintln!("{}", r#"  / ___| | ___  _   _  __| | |_ __ _ _ __  "#.bold().cyan());
    eprintln!("{}", r#" | |   | |/ _ \| | | |/ _` | __/ _` | '_ \ "#.bold().cyan());
    eprintln!("{}", r#" | |___| | (_) | |_| | (_| | || (_| | |_) |"#.bold().cyan());
    eprintln!("{}", r#"  \____|_|\___/ \__,_|\__,_|\__\__,_| .__/ "#.bold().cyan());
    eprintln!("{}", r#"                                    |_|    "#.bold().cyan());
    eprintln!();
    eprintln!(
        "  {} {}",
        "cloudtap".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    eprintln!("  Live point cloud subscriber");
    eprintln!();
}

fn print_summary(topic: &str, frames: u64, stats: &DispatchStats) {
    eprintln!();
    eprintln!("  {} {}", "✓".green().bold(), topic.bold());
    eprintln!("    frames published  {frames}");
    eprintln!("    wake-ups          {}", stats.wake_ups);
    eprintln!("    batches           {}", stats.batches);
    eprintln!("    points            {}", stats.points);
    eprintln!("    discarded         {}", stats.discarded);
    eprintln!("    skipped           {}", stats.skipped.to_string().yellow());
    eprintln!("    throttled         {}", stats.throttled);
    eprintln!("    wait failures     {}", stats.wait_failures);
    eprintln!("    notifications     {}", stats.notifications);
}
