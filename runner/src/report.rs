//! Report module: human-readable rendering of a benchmark run.

use std::fmt::Write;

use runner_core::types::{BenchmarkReport, RunStatus};

/// Render `report` as a text table.
pub fn render_report(report: &BenchmarkReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, report);
    out
}

/// Print the rendered report to stdout.
pub fn print_report(report: &BenchmarkReport) {
    print!("{}", render_report(report));
}

fn write_report(out: &mut String, report: &BenchmarkReport) -> std::fmt::Result {
    let verdict = match report.status {
        RunStatus::Ok => "OK",
        RunStatus::Partial => "PARTIAL",
    };

    writeln!(out, "{}", "=".repeat(80))?;
    writeln!(out, "  SQL Script Benchmark Report")?;
    writeln!(
        out,
        "  Scripts dir: {} | {} run(s) per script | transactional: {}",
        report.config.scripts_dir.display(),
        report.config.count_per_script,
        report.config.transactional
    )?;
    writeln!(out, "{}", "=".repeat(80))?;

    writeln!(
        out,
        "  {:10} {:>6} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Script", "Runs", "Errors", "Min (ms)", "Med (ms)", "Mean (ms)", "p95 (ms)", "Max (ms)"
    )?;
    writeln!(out, "  {}", "-".repeat(78))?;

    for entry in report.per_script.values() {
        let s = &entry.stats;
        writeln!(
            out,
            "  {:10} {:>6} {:>6} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
            entry.script,
            entry.count,
            entry.errors,
            s.min_ms,
            s.median_ms,
            s.mean_ms,
            s.p95_ms,
            s.max_ms
        )?;
    }

    // First error per failing script, so a partial run explains itself.
    let failures: Vec<_> = report
        .per_script
        .values()
        .filter_map(|e| e.first_error.as_deref().map(|msg| (&e.script, msg)))
        .collect();
    if !failures.is_empty() {
        writeln!(out, "\n  Errors:")?;
        for (script, msg) in failures {
            writeln!(out, "  {script:10} {msg}")?;
        }
    }

    writeln!(out, "\n{}", "=".repeat(80))?;
    writeln!(
        out,
        "  Tasks: {} total, {} completed, {} failed",
        report.total_tasks, report.completed, report.errors
    )?;
    writeln!(
        out,
        "  Wall time: {:.3} ms with {} workers",
        report.wall_time_ms, report.workers_used
    )?;
    writeln!(out, "  Status: {verdict}")?;
    writeln!(out)?;
    Ok(())
}
