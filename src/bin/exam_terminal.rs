// src/bin/exam_terminal.rs

use std::{fmt::Write, path::PathBuf};

use clap::Parser;
use exam_portal::{
    config::ControllerConfig,
    controller::{AdmissionController, ControllerHandle, Snapshot},
    error::ControllerError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "commands: r <registration number> | <option number> | n (next) | f (finish) | q (quit)";

/// Candidate terminal: counts down to the next exam, admits a registration
/// and runs the session.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Registration number to submit as soon as the admission window opens.
    #[arg(long)]
    registration: Option<String>,

    /// Portal base URL; defaults to PORTAL_URL.
    #[arg(long)]
    portal_url: Option<String>,

    /// File for undelivered submissions; defaults to OUTBOX_PATH.
    #[arg(long)]
    outbox: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    let mut config = ControllerConfig::from_env();
    if let Some(url) = args.portal_url {
        config.portal_url = url;
    }
    if let Some(path) = args.outbox {
        config.outbox_path = Some(path);
    }

    let handle = match AdmissionController::connect(config) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to start the admission controller: {e}");
            std::process::exit(1);
        }
    };

    println!("{HELP}");
    let mut pending_registration = args.registration;
    let mut snapshots = handle.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_screen = String::new();
    let mut last_error: Option<ControllerError> = None;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    eprintln!("admission controller stopped");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();

                let screen = render(&snapshot);
                if screen != last_screen {
                    println!("{screen}");
                    last_screen = screen;
                }
                if snapshot.last_error != last_error {
                    if let Some(e) = &snapshot.last_error {
                        println!("! {e}");
                    }
                    last_error = snapshot.last_error.clone();
                }
                if snapshot.result.is_some() {
                    break;
                }

                let window_open = snapshot.window.is_some_and(|w| w.accepts_registration());
                if window_open {
                    if let Some(number) = pending_registration.take() {
                        report(handle.register(number).await);
                    }
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line == "q" {
                        break;
                    }
                    if !line.is_empty() {
                        report(run_command(&handle, line).await);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    eprintln!("stdin closed: {e}");
                    stdin_open = false;
                }
            },
        }
    }
}

async fn run_command(handle: &ControllerHandle, line: &str) -> Result<(), ControllerError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("r"), Some(number)) => handle.register(number).await,
        (Some("n"), None) => handle.advance().await,
        (Some("f"), None) => handle.finish().await,
        (Some(option), None) => match option.parse::<usize>() {
            Ok(n) if n > 0 => handle.select(n - 1).await,
            _ => {
                println!("{HELP}");
                Ok(())
            }
        },
        _ => {
            println!("{HELP}");
            Ok(())
        }
    }
}

fn report(outcome: Result<(), ControllerError>) {
    if let Err(e) = outcome {
        println!("! {e}");
    }
}

/// Everything except the per-second countdown, so the screen only redraws on change.
fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    if let Some(result) = &snapshot.result {
        let _ = write!(
            out,
            "Submitted: {} correct, {} wrong, {} skipped of {} ({:.2}%)",
            result.correct, result.wrong, result.skipped, result.total_questions, result.percentage
        );
        return out;
    }

    if let Some(view) = &snapshot.question {
        let _ = writeln!(out, "Q{}/{}: {}", view.position + 1, view.total, view.question.prompt);
        for (i, option) in view.question.options.iter().enumerate() {
            let marker = if view.selected == Some(i) { '*' } else { ' ' };
            let _ = writeln!(out, " {marker}{}. {option}", i + 1);
        }
        let _ = write!(out, "{}", if view.is_last { "[f] finish" } else { "[n] next" });
        return out;
    }

    match (&snapshot.exam, &snapshot.window) {
        (Some(exam), Some(window)) => {
            let _ = write!(
                out,
                "Exam {} at {}: {:?}, {} min to start",
                exam.id,
                exam.starts_at(),
                window.state,
                window.minutes_until_start.max(0)
            );
            if let Some(candidate) = &snapshot.candidate {
                let _ = write!(out, " | registered: {}", candidate.candidate_name);
            } else if snapshot.blocked {
                let _ = write!(out, " | not registered for this exam");
            }
        }
        _ => out.push_str("Waiting for the exam catalog..."),
    }
    if snapshot.feed_error.is_some() {
        out.push_str(" (catalog offline, retrying)");
    }
    out
}
