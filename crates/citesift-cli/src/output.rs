use std::io::Write;
use std::path::PathBuf;

use citesift_core::{Collection, HarvestEvent, Reconciliation, RunStats};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// One line describing a progress event, or `None` for events the progress
/// bar already conveys.
pub fn progress_line(event: &HarvestEvent, color: ColorMode) -> Option<String> {
    match event {
        HarvestEvent::PhaseStarted { collection, total } => Some(if color.enabled() {
            format!("{} {} ({} inputs)", "Harvesting".bold().cyan(), collection.bold(), total)
        } else {
            format!("Harvesting {} ({} inputs)", collection, total)
        }),
        HarvestEvent::Reconciled {
            index,
            total,
            source_id,
            reconciliation,
        } => {
            let idx = index + 1;
            let label = reconciliation.label();
            let shown = if !color.enabled() {
                label.to_string()
            } else {
                match reconciliation.as_ref() {
                    Reconciliation::Unique(_) | Reconciliation::Exact(_) => label.green().to_string(),
                    Reconciliation::Probable(_) => label.yellow().to_string(),
                    Reconciliation::NoVerifiableMatch { .. } | Reconciliation::NotFound => {
                        label.red().to_string()
                    }
                }
            };
            let count = match reconciliation.as_ref() {
                Reconciliation::Probable(rs) => format!(" ({} for review)", rs.len()),
                Reconciliation::NoVerifiableMatch { candidates } => {
                    format!(" ({} candidates)", candidates)
                }
                _ => String::new(),
            };
            Some(format!("[{}/{}] {} -> {}{}", idx, total, source_id, shown, count))
        }
        HarvestEvent::HotRecord {
            source_id,
            title,
            resolved,
            error,
        } => {
            let title = shorten(title, 60);
            if let Some(error) = error {
                let msg = format!("hot \"{}\" search failed: {}", title, error);
                return Some(if color.enabled() {
                    format!("  {}", msg.yellow())
                } else {
                    format!("  {}", msg)
                });
            }
            Some(match (resolved, color.enabled()) {
                (true, true) => format!("  {} \"{}\" (from {})", "HOT".green(), title, source_id),
                (true, false) => format!("  HOT \"{}\" (from {})", title, source_id),
                (false, true) => format!("  {}", format!("hot \"{}\" unresolved", title).dimmed()),
                (false, false) => format!("  hot \"{}\" unresolved", title),
            })
        }
        HarvestEvent::Failed {
            index,
            total,
            query,
            error,
            throttled,
        } => {
            let tag = if *throttled { "THROTTLED" } else { "FAILED" };
            let query = shorten(query, 60);
            Some(if color.enabled() {
                format!("[{}/{}] {} {}: {}", index + 1, total, tag.red(), query, error.dimmed())
            } else {
                format!("[{}/{}] {} {}: {}", index + 1, total, tag, query, error)
            })
        }
        HarvestEvent::Searching { .. }
        | HarvestEvent::Completed { .. }
        | HarvestEvent::PhaseFinished { .. } => None,
    }
}

/// Print the end-of-run summary: per-collection counts, files written and
/// reconciliation tallies.
pub fn print_summary(
    w: &mut dyn Write,
    stats: &RunStats,
    counts: &[(Collection, usize)],
    written: &[PathBuf],
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "SUMMARY".bold())?;
    } else {
        writeln!(w, "SUMMARY")?;
    }
    writeln!(w, "  Inputs processed: {}", stats.inputs_processed)?;
    writeln!(w, "  Records found:    {}", stats.records_found)?;
    writeln!(w, "  Records stored:   {}", stats.records_stored)?;
    for (collection, n) in counts {
        writeln!(w, "    {:<20} {}", collection.name(), n)?;
    }

    let reconciled = stats.unique + stats.exact + stats.probable + stats.unverified + stats.not_found;
    if reconciled > 0 {
        writeln!(w)?;
        if color.enabled() {
            writeln!(w, "  {:<18} {}", "Unique:".green(), stats.unique)?;
            writeln!(w, "  {:<18} {}", "Exact:".green(), stats.exact)?;
            writeln!(w, "  {:<18} {}", "Probable:".yellow(), stats.probable)?;
            writeln!(w, "  {:<18} {}", "Unverified:".red(), stats.unverified)?;
            writeln!(w, "  {:<18} {}", "Not found:".red(), stats.not_found)?;
        } else {
            writeln!(w, "  Unique:           {}", stats.unique)?;
            writeln!(w, "  Exact:            {}", stats.exact)?;
            writeln!(w, "  Probable:         {}", stats.probable)?;
            writeln!(w, "  Unverified:       {}", stats.unverified)?;
            writeln!(w, "  Not found:        {}", stats.not_found)?;
        }
    }

    writeln!(w)?;
    writeln!(
        w,
        "  Remote calls: {} ({} re-authorizations, {} throttled)",
        stats.remote_calls, stats.reauthorizations, stats.throttled
    )?;
    if stats.hot_failures > 0 {
        writeln!(w, "  Hot reference searches failed: {}", stats.hot_failures)?;
    }
    if stats.errors > 0 {
        let msg = format!("  {} inputs failed; see the log for the offending queries", stats.errors);
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }

    if written.is_empty() {
        writeln!(w, "  No results written.")?;
    } else {
        writeln!(w)?;
        for path in written {
            writeln!(w, "  Wrote {}", path.display())?;
        }
    }
    Ok(())
}
