//! Human-readable attempt reports printed by the CLI

use colored::{ColoredString, Colorize};

use crate::deploy::controller::StackStatus;
use crate::models::attempt::{DeploymentAttempt, Outcome, Phase};
use crate::models::health::Verdict;

fn colorize_phase(phase: Phase) -> ColoredString {
    let text = phase.to_string();
    match phase.outcome() {
        Some(Outcome::Success) => text.green().bold(),
        Some(Outcome::Recovered) => text.yellow().bold(),
        Some(Outcome::Unrecovered) => text.red().bold().underline(),
        Some(Outcome::Rejected) | Some(Outcome::Aborted) => text.red().bold(),
        None => text.cyan().bold(),
    }
}

/// Print the final report of an attempt: id, phase reached, diagnostics
pub fn print_attempt(attempt: &DeploymentAttempt) {
    println!(
        "{} {} attempt {} -> {}",
        "→".cyan().bold(),
        attempt.stack.bold(),
        attempt.id.dimmed(),
        colorize_phase(attempt.phase())
    );
    println!(
        "  {} started {}, updated {}",
        "•".dimmed(),
        attempt.started_at.to_rfc3339(),
        attempt.updated_at.to_rfc3339()
    );

    if !attempt.snapshot.is_empty() {
        println!("  {} snapshot:", "•".dimmed());
        for (service, image) in &attempt.snapshot {
            println!("      {} {}", service.bold(), image.dimmed());
        }
    }

    if let Some(convergence) = &attempt.convergence {
        println!(
            "  {} convergence: {} round(s), {} lagging",
            "•".dimmed(),
            convergence.rounds,
            convergence.lagging.len()
        );
        for lag in &convergence.lagging {
            println!(
                "      {} {}/{} running",
                lag.service.bold(),
                lag.current,
                lag.desired
            );
            for err in &lag.task_errors {
                println!("        {}", err.red());
            }
        }
    }

    if let Some(health) = &attempt.health {
        let verdict = match health.verdict {
            Verdict::Healthy => "healthy".green(),
            Verdict::Unhealthy => "unhealthy".red(),
        };
        let last = health
            .last
            .as_ref()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!(
            "  {} health: {} after {} probe(s) of {} (last: {})",
            "•".dimmed(),
            verdict,
            health.attempts,
            health.url,
            last
        );
    }

    if let Some(rollback) = &attempt.rollback {
        for (service, image) in &rollback.restored {
            println!("  {} restored {} to {}", "✓".green(), service.bold(), image);
        }
        for service in &rollback.missing_snapshot {
            println!("  {} {} has no snapshot", "✗".red(), service.bold());
        }
        for (service, reason) in &rollback.failed {
            println!("  {} {} failed: {}", "✗".red(), service.bold(), reason);
        }
    }

    if !attempt.diagnostics.is_empty() {
        println!("  {} diagnostics:", "•".dimmed());
        for diagnostic in &attempt.diagnostics {
            println!(
                "      [{}] {}",
                diagnostic.phase.to_string().dimmed(),
                diagnostic.message
            );
        }
    }

    match attempt.phase() {
        Phase::Aborted => println!(
            "{} Aborted; run `stackroll rollback {}` to restore the previous images",
            "⚠".yellow().bold(),
            attempt.stack
        ),
        Phase::RollbackUnavailable => println!(
            "{} Rollback incomplete; operator intervention required",
            "✗".red().bold()
        ),
        _ => {}
    }
}

/// Print `status` output
pub fn print_status(status: &StackStatus) {
    print_attempt(&status.attempt);

    match &status.lock {
        Some(holder) => println!("  {} locked by {}", "⚠".yellow(), holder),
        None => println!("  {} not locked", "•".dimmed()),
    }

    if !status.live.is_empty() {
        println!("  {} live:", "•".dimmed());
        for (service, state) in &status.live {
            match state {
                Ok(state) => {
                    let counts = format!("{}/{}", state.current, state.desired);
                    let counts = if state.is_converged() {
                        counts.green()
                    } else {
                        counts.yellow()
                    };
                    println!(
                        "      {} {} {}",
                        service.bold(),
                        counts,
                        state.image.as_deref().unwrap_or("-").dimmed()
                    );
                }
                Err(e) => println!("      {} {}", service.bold(), e.to_string().red()),
            }
        }
    }
}
