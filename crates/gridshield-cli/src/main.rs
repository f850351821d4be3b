//! `gridshield-cli` – Gridshield Command Line Interface
//!
//! This binary is the primary entry point for the gridshield stack.  It:
//!
//! 1. Checks for `~/.gridshield/config.toml`; runs a **First-Run Wizard**
//!    when the file is absent.
//! 2. Builds the cloud client – the real HTTP backend, or a simulated device
//!    for offline experimentation.
//! 3. Spawns the [`ShieldService`] with its dispatch and retention loops.
//! 4. Drops the user into an **interactive REPL** with slash-commands
//!    (`/status`, `/mode`, `/export`, `/limit`, `/boiler`, `/charge`,
//!    `/cancel`, `/help`) while request outcomes stream in asynchronously.
//! 5. Intercepts **Ctrl-C** for a clean shutdown.

mod config;
mod repl;
mod sim;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use tracing::warn;

use gridshield_runtime::{CloudClient, HttpCloudClient, ShieldService};
use gridshield_types::ShieldEvent;
use sim::SimulatedClient;

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG controls the filter; GRIDSHIELD_LOG_FORMAT=json switches to
    // newline-delimited JSON.  The CLI's user-facing output still uses
    // println! for UX consistency.
    let _telemetry = gridshield_runtime::init_tracing("gridshield");

    print_banner();

    // ── Configuration / First-Run Wizard ──────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Shared shutdown flag + Ctrl-C handler ─────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Async runtime ─────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let _enter = runtime.enter();

    // ── Cloud client ──────────────────────────────────────────────────────
    let client: Arc<dyn CloudClient> = if cfg.simulate {
        println!(
            "  Dispatching against the {} (latency {} ms)",
            "simulated device".bold(),
            cfg.simulate_latency_ms
        );
        Arc::new(SimulatedClient::new(
            Duration::from_millis(cfg.simulate_latency_ms),
            cfg.simulate_fail_every,
        ))
    } else {
        println!("  Dispatching against {}", cfg.api_base_url.bold());
        Arc::new(HttpCloudClient::new(
            cfg.api_base_url.clone(),
            cfg.api_key.clone(),
        ))
    };

    // ── Shield service ────────────────────────────────────────────────────
    let service = ShieldService::spawn(cfg.to_shield_config(), client);

    // Stream request outcomes to the terminal while the REPL is in charge of
    // the prompt.
    let mut events = service.subscribe();
    runtime.spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ShieldEvent::RequestCompleted { kind, duration, .. } => {
                    println!(
                        "\n  {} {} applied in {:.1} s",
                        "✓".green().bold(),
                        kind,
                        duration.as_secs_f64()
                    );
                }
                ShieldEvent::RequestFailed {
                    kind,
                    error,
                    retries,
                    ..
                } => {
                    println!(
                        "\n  {} {} failed after {} retries: {}",
                        "✗".red().bold(),
                        kind,
                        retries,
                        error
                    );
                }
                ShieldEvent::QueueChanged { .. } => {}
            }
        }
    });

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&service, shutdown);

    service.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║     Gridshield First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up gridshield.\n");

    let mut cfg = config::Config::default();

    println!("  Which backend should control requests go to?");
    println!("    1) Simulated device  (default, safe to experiment)");
    println!("    2) Real cloud API");
    let choice = prompt_line("  Enter choice [1]: ", "1");
    if choice.trim() == "2" {
        cfg.simulate = false;
        cfg.api_base_url = prompt_line(
            &format!("  Cloud API base URL [{}]: ", cfg.api_base_url),
            &cfg.api_base_url,
        );
        cfg.api_key = prompt_line("  Cloud API key: ", "");
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______     _     __         __    _      __   __"#.bold().cyan());
    println!("{}", r#"  / ____/____(_)___/ /_____ __/ /_  (_)__  / /__/ /"#.bold().cyan());
    println!("{}", r#" / / __/ ___/ / __  / ___/ // / _ \/ / _ \/ / _  / "#.bold().cyan());
    println!("{}", r#" \____/_/  /_/\__,_/____/_//_/_//_/_/\___/_/\__,_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Gridshield".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Admission shield for the battery/inverter cloud API");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
