//! REPL – Read-Eval-Print Loop for the gridshield interactive shell.
//!
//! Supported slash-commands:
//!   /help                           – show this list
//!   /status                         – print the running + pending queue
//!   /mode <eco|timed|home-ups>      – change the inverter operating mode
//!   /export <off|unlimited|limited <watts>> – change grid export behaviour
//!   /limit <watts>                  – change the grid-export power limit
//!   /boiler <off|heat-now|schedule> – change the boiler diverter mode
//!   /charge <on <minutes>|off>      – start or stop a forced charge
//!   /cancel <position>              – cancel a pending request
//!   /quit | /exit                   – gracefully exit the CLI
//!
//! Every mutating command asks for an interactive confirmation before it is
//! submitted; the confirmation becomes the request's acknowledgement flag.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use gridshield_runtime::ShieldService;
use gridshield_types::{QueuedRequest, RequestKind};
use serde_json::{Value, json};

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Cancel(usize),
    Submit {
        kind: RequestKind,
        params: Value,
        summary: String,
    },
    Quit,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(service: &ShieldService, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "gridshield>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match parse_command(input) {
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Status) => cmd_status(service),
            Ok(Command::Cancel(position)) => cmd_cancel(service, position),
            Ok(Command::Submit {
                kind,
                params,
                summary,
            }) => cmd_submit(service, kind, params, &summary),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(message) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    message,
                    "/help".bold()
                );
            }
        }
    }
}

/// Parse one input line into a [`Command`].
///
/// Submission commands carry raw, unvalidated parameters; enumerated values
/// and ranges are the validator's job, so a typo'd mode is rejected with the
/// same specific error any other caller would get.
pub fn parse_command(input: &str) -> Result<Command, String> {
    let mut words = input.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match command {
        "/help" => Ok(Command::Help),
        "/status" => Ok(Command::Status),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/cancel" => {
            let position = args
                .first()
                .ok_or("usage: /cancel <position>")?
                .parse::<usize>()
                .map_err(|_| "position must be a number".to_string())?;
            Ok(Command::Cancel(position))
        }
        "/mode" => {
            let mode = *args.first().ok_or("usage: /mode <eco|timed|home-ups>")?;
            Ok(Command::Submit {
                kind: RequestKind::OperatingMode,
                params: json!({ "mode": mode }),
                summary: format!("set operating mode to '{mode}'"),
            })
        }
        "/export" => {
            let mode = *args
                .first()
                .ok_or("usage: /export <off|unlimited|limited <watts>>")?;
            let params = match args.get(1) {
                Some(watts) => {
                    let watts = watts
                        .parse::<i64>()
                        .map_err(|_| "watts must be a number".to_string())?;
                    json!({ "mode": mode, "limit_watts": watts })
                }
                None => json!({ "mode": mode }),
            };
            Ok(Command::Submit {
                kind: RequestKind::GridExport,
                params,
                summary: format!("set grid export to '{mode}'"),
            })
        }
        "/limit" => {
            let watts = args
                .first()
                .ok_or("usage: /limit <watts>")?
                .parse::<i64>()
                .map_err(|_| "watts must be a number".to_string())?;
            Ok(Command::Submit {
                kind: RequestKind::ExportLimit,
                params: json!({ "limit_watts": watts }),
                summary: format!("set export limit to {watts} W"),
            })
        }
        "/boiler" => {
            let mode = *args
                .first()
                .ok_or("usage: /boiler <off|heat-now|schedule>")?;
            Ok(Command::Submit {
                kind: RequestKind::Boiler,
                params: json!({ "mode": mode }),
                summary: format!("set boiler mode to '{mode}'"),
            })
        }
        "/charge" => match args.first() {
            Some(&"on") => {
                let minutes = args
                    .get(1)
                    .ok_or("usage: /charge on <minutes>")?
                    .parse::<i64>()
                    .map_err(|_| "minutes must be a number".to_string())?;
                Ok(Command::Submit {
                    kind: RequestKind::ForcedCharge,
                    params: json!({ "enable": true, "duration_minutes": minutes }),
                    summary: format!("force-charge the battery for {minutes} min"),
                })
            }
            Some(&"off") => Ok(Command::Submit {
                kind: RequestKind::ForcedCharge,
                params: json!({ "enable": false }),
                summary: "stop the forced charge".to_string(),
            }),
            _ => Err("usage: /charge <on <minutes>|off>".to_string()),
        },
        other => Err(format!("unknown command '{other}'")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Gridshield Commands".bold().underline());
    println!("  {}                       – running + pending queue", "/status".bold().cyan());
    println!("  {}   – change operating mode", "/mode <eco|timed|home-ups>".bold().cyan());
    println!("  {} – change grid export", "/export <off|unlimited|limited <W>>".bold().cyan());
    println!("  {}                – change export power limit", "/limit <watts>".bold().cyan());
    println!("  {} – change boiler mode", "/boiler <off|heat-now|schedule>".bold().cyan());
    println!("  {}      – forced charge on/off", "/charge <on <min>|off>".bold().cyan());
    println!("  {}            – cancel a pending request", "/cancel <position>".bold().cyan());
    println!("  {}                  – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(service: &ShieldService) {
    let snapshot = service.snapshot();
    println!();
    match &snapshot.running {
        Some(request) => {
            println!(
                "  {} {}",
                "▶ running".bold().yellow(),
                describe_request(request)
            );
        }
        None => println!("  {}", "▶ idle – nothing running".dimmed()),
    }
    if snapshot.pending.is_empty() {
        println!("  {}", "no pending requests".dimmed());
    } else {
        for request in &snapshot.pending {
            println!("  {} {}", format!("{:>2}.", request.position).bold(), describe_request(request));
        }
    }
    println!();
}

fn describe_request(request: &QueuedRequest) -> String {
    let targets: Vec<String> = request
        .targets
        .iter()
        .map(|t| format!("{}={}", t.parameter, t.value))
        .collect();
    let mut line = format!("{} [{}]", request.kind, targets.join(", "));
    if request.retry_count > 0 {
        line.push_str(&format!(" (retry {})", request.retry_count));
    }
    line
}

fn cmd_cancel(service: &ShieldService, position: usize) {
    match service.cancel(position) {
        Ok(()) => println!("  {} request at position {position} cancelled", "✓".green().bold()),
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

fn cmd_submit(service: &ShieldService, kind: RequestKind, mut params: Value, summary: &str) {
    // The interactive confirmation becomes the request's acknowledgement
    // flag; declining submits nothing at all.
    print!("  About to {}. Confirm? [y/N]: ", summary.bold());
    io::stdout().flush().ok();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        println!("  {}", "aborted".dimmed());
        return;
    }
    if !matches!(answer.trim(), "y" | "Y" | "yes") {
        println!("  {}", "not confirmed; nothing submitted".dimmed());
        return;
    }
    if let Some(map) = params.as_object_mut() {
        map.insert("confirm".to_string(), Value::Bool(true));
    }

    match service.submit(kind, &params) {
        Ok(receipt) => println!(
            "  {} queued {} at position {} (id {})",
            "✓".green().bold(),
            kind.to_string().bold(),
            receipt.position,
            receipt.id
        ),
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode_command() {
        let command = parse_command("/mode eco").unwrap();
        match command {
            Command::Submit { kind, params, .. } => {
                assert_eq!(kind, RequestKind::OperatingMode);
                assert_eq!(params["mode"], "eco");
                // The acknowledgement flag is only added after interactive
                // confirmation.
                assert!(params.get("confirm").is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_export_limited_with_watts() {
        let command = parse_command("/export limited 5000").unwrap();
        match command {
            Command::Submit { kind, params, .. } => {
                assert_eq!(kind, RequestKind::GridExport);
                assert_eq!(params["mode"], "limited");
                assert_eq!(params["limit_watts"], 5000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_export_without_watts() {
        let command = parse_command("/export unlimited").unwrap();
        match command {
            Command::Submit { params, .. } => {
                assert!(params.get("limit_watts").is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_charge_on_requires_minutes() {
        assert!(parse_command("/charge on").is_err());
        let command = parse_command("/charge on 90").unwrap();
        match command {
            Command::Submit { kind, params, .. } => {
                assert_eq!(kind, RequestKind::ForcedCharge);
                assert_eq!(params["enable"], true);
                assert_eq!(params["duration_minutes"], 90);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_charge_off_has_no_duration() {
        let command = parse_command("/charge off").unwrap();
        match command {
            Command::Submit { params, .. } => {
                assert_eq!(params["enable"], false);
                assert!(params.get("duration_minutes").is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_cancel_position() {
        assert_eq!(parse_command("/cancel 3").unwrap(), Command::Cancel(3));
        assert!(parse_command("/cancel three").is_err());
        assert!(parse_command("/cancel").is_err());
    }

    #[test]
    fn parse_typoed_mode_is_deferred_to_the_validator() {
        // The REPL does not second-guess enumerated values.
        let command = parse_command("/mode turbo").unwrap();
        match command {
            Command::Submit { params, .. } => assert_eq!(params["mode"], "turbo"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_command() {
        assert!(parse_command("/teleport").is_err());
        assert!(parse_command("status").is_err());
    }

    #[test]
    fn parse_non_numeric_watts_rejected() {
        assert!(parse_command("/limit lots").is_err());
        assert!(parse_command("/export limited lots").is_err());
    }
}
