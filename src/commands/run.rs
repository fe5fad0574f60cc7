//! Sequence commands: check and run

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use relayctl_bank::RelayBank;
use relayctl_core::config::Config;
use relayctl_core::map::RelayMap;
use relayctl_core::sequence::{self, FailurePolicy, Sequence, SequenceError, SequenceFormat};

use super::CommandError;

/// Create the progress bar style for sequence runs
fn create_progress_bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("#>-"))
}

/// Load a sequence, printing every row error
fn load(
    path: &Path,
    map: &RelayMap,
    format: &SequenceFormat,
) -> Result<Sequence, Box<dyn std::error::Error>> {
    match sequence::load_sequence(path, map, format) {
        Ok(sequence) => Ok(sequence),
        Err(SequenceError::Rows(rows)) => {
            eprintln!("{}: {} malformed row(s)", path.display(), rows.len());
            for row in &rows {
                eprintln!("  {}", row);
            }
            Err(CommandError::InvalidSequence(path.display().to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Validate a sequence file without opening the adapter
pub fn cmd_check(config: &Config, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let map = config.relay_map()?;
    let sequence = load(path, &map, &config.sequence_format())?;

    println!(
        "{}: {} step(s) from {} row(s), {:.1}s of delays",
        path.display(),
        sequence.len(),
        sequence.row_count(),
        sequence.total_delay().as_secs_f64()
    );
    Ok(())
}

/// Run a sequence file with a progress bar
pub fn cmd_run(
    bank: &RelayBank,
    path: &Path,
    abort_on_failure: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let sequence = load(path, bank.map(), &bank.config().sequence_format())?;
    let total = sequence.len();

    let policy = if abort_on_failure {
        Some(FailurePolicy::AbortOnFirstFailure)
    } else {
        None
    };

    let pb = ProgressBar::new(total as u64);
    pb.set_style(create_progress_bar_style().unwrap_or_else(|_| ProgressStyle::default_bar()));

    let mut run = bank.run_sequence(sequence, policy);
    let mut failed = 0;
    for result in run.by_ref() {
        pb.set_message(format!("{} -> {}", result.step.relay, result.step.state));
        if let Err(e) = &result.outcome {
            failed += 1;
            pb.println(format!(
                "step {} (row {}): {}",
                result.index + 1,
                result.step.row,
                e
            ));
        }
        pb.inc(1);
    }

    if run.was_aborted() {
        pb.abandon_with_message("aborted");
    } else {
        pb.finish_with_message("done");
    }
    println!("Completed {} of {} step(s)", run.completed(), total);

    if failed > 0 {
        return Err(CommandError::SequenceFailed { failed, total }.into());
    }
    Ok(())
}
