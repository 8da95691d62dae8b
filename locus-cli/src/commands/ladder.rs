//! Print the effective degradation ladder.

use std::time::Duration;

use clap::Args;
use locus::config::ConfigFile;
use locus::ladder::{effective_modifier, DegradationLadder, MAX_INTERVAL_MODIFIER};
use locus::AccuracyTier;

use crate::error::CliError;

/// Arguments for `locus ladder`.
#[derive(Debug, Args)]
pub struct LadderArgs {
    /// Starting tier (defaults to desired_accuracy from the config)
    #[arg(long)]
    pub tier: Option<AccuracyTier>,

    /// Timeout multiplier (defaults to interval_modifier from the config)
    #[arg(long)]
    pub interval_modifier: Option<f64>,
}

/// Run the ladder command.
pub fn run(args: LadderArgs, config: &ConfigFile) -> Result<(), CliError> {
    let tier = args.tier.unwrap_or(config.manager.desired_accuracy);
    let modifier = match args.interval_modifier {
        Some(m) => check_modifier(m)?,
        None => effective_modifier(config.manager.interval_modifier),
    };

    let ladder = config.manager.ladder.ladder_for(tier, modifier);
    println!("Degradation ladder from {} (interval modifier {})", tier, modifier);
    println!();
    for line in render(&ladder) {
        println!("{}", line);
    }
    println!();
    println!("Total budget: {}", format_duration(ladder.total_budget()));
    Ok(())
}

fn check_modifier(modifier: f64) -> Result<f64, CliError> {
    if modifier.is_finite() && modifier > 0.0 && modifier <= MAX_INTERVAL_MODIFIER {
        Ok(modifier)
    } else {
        Err(CliError::InvalidArgument(format!(
            "interval modifier must be greater than zero and at most {}, got {}",
            MAX_INTERVAL_MODIFIER, modifier
        )))
    }
}

fn render(ladder: &DegradationLadder) -> Vec<String> {
    let mut lines = vec![format!(
        "  {:<4} {:<18} {:>10} {:>10} {:>10}",
        "step", "tier", "accuracy", "timeout", "ends at"
    )];
    let mut elapsed = Duration::ZERO;
    for (index, step) in ladder.steps().iter().enumerate() {
        elapsed += step.timeout;
        lines.push(format!(
            "  {:<4} {:<18} {:>10} {:>10} {:>10}",
            index,
            step.tier.as_str(),
            format_accuracy(step.tier),
            format_duration(step.timeout),
            format_duration(elapsed)
        ));
    }
    lines
}

fn format_accuracy(tier: AccuracyTier) -> String {
    let meters = tier.max_accuracy_m();
    if meters.is_finite() {
        format!("<= {}m", meters)
    } else {
        "any".to_string()
    }
}

fn format_duration(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}
