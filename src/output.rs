use std::path::Path;

use console::Style;

use crate::mutants::{ExecutionOutcome, Mutant};
use crate::report::Report;

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_warning(msg: &str) {
    let style = Style::new().yellow().bold();
    eprintln!("{} {}", style.apply_to("!"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

/// Immediate feedback after one mutant has run.
pub fn print_mutant_feedback(outcome: &ExecutionOutcome) {
    let verdict = if outcome.timed_out {
        Style::new().yellow().bold().apply_to("CAUGHT (timed out)")
    } else if outcome.caught {
        Style::new().green().bold().apply_to("CAUGHT")
    } else {
        Style::new().red().bold().apply_to("NOT CAUGHT")
    };
    let dim = Style::new().dim();
    println!(
        "Mutation '{}' at line {} was {}",
        outcome.label, outcome.line, verdict
    );
    println!("  {} {}", dim.apply_to("original:"), outcome.original_code);
    println!("  {} {}", dim.apply_to("mutated: "), outcome.mutated_code);
    println!(
        "  {} {}, {} {}",
        dim.apply_to("failures:"),
        outcome.failures,
        dim.apply_to("errors:"),
        outcome.errors
    );
    if let Some(error) = &outcome.error {
        println!("  {} {}", dim.apply_to("error:"), error);
    }
}

pub fn print_summary(report: &Report) {
    let pct = report.mutation_coverage;
    println!();
    if report.total_mutants == 0 {
        print_success("No mutable operators found.");
    } else if report.not_caught == 0 {
        let style = Style::new().green().bold();
        println!(
            "{} {}: {} mutants, all caught ({:.1}%) in {:.1}s",
            style.apply_to("✓"),
            report.source_file,
            report.total_mutants,
            pct,
            report.duration_seconds,
        );
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {}: {} of {} mutants not caught ({:.1}% coverage) in {:.1}s",
            style.apply_to("!"),
            report.source_file,
            report.not_caught,
            report.total_mutants,
            pct,
            report.duration_seconds,
        );
    }

    let dim = Style::new().dim();
    if report.timed_out > 0 {
        println!("  {} {} mutants timed out", dim.apply_to("·"), report.timed_out);
    }
    if !report.baseline.was_successful() {
        println!(
            "  {} baseline had {} failures and {} errors",
            dim.apply_to("·"),
            report.baseline.failures,
            report.baseline.errors
        );
    }
    if report.cancelled {
        println!("  {} run was cancelled; report is partial", dim.apply_to("·"));
    }

    print_survivors(report);
}

pub fn print_report_location(path: &Path) {
    println!();
    println!("Report written to {}", path.display());
}

fn print_survivors(report: &Report) {
    let survivors: Vec<&ExecutionOutcome> = report.survivors().collect();
    if survivors.is_empty() {
        return;
    }
    println!();
    let ref_style = Style::new().cyan().bold();
    let loc_style = Style::new().dim();
    let op_style = Style::new().magenta();
    for m in survivors {
        println!(
            "  {} {}:{} {} {} → {}",
            ref_style.apply_to(format!("@m{}", m.index)),
            report.source_file,
            m.line,
            loc_style.apply_to(format!("[{}]", m.label)),
            op_style.apply_to(&m.original_code),
            op_style.apply_to(&m.mutated_code),
        );
    }
}

pub fn print_status(report: &Report) {
    println!(
        "Last run ({}): {} mutants, {} caught, {} not caught ({:.1}% coverage)",
        report.timestamp.format("%Y-%m-%d %H:%M:%S"),
        report.total_mutants,
        report.caught,
        report.not_caught,
        report.mutation_coverage,
    );
    if report.cancelled {
        println!("Run was cancelled; report is partial.");
    }
    if report.not_caught > 0 {
        print_survivors(report);
        println!();
        println!("Use `mutcheck show @m<index>` for details on a specific mutant.");
    }
}

pub fn print_mutant_detail(m: &ExecutionOutcome, file: &str) {
    let ref_style = Style::new().cyan().bold();
    let verdict = if m.caught { "caught" } else { "not caught" };
    println!(
        "{} {}:{} [{}] {}",
        ref_style.apply_to(format!("@m{}", m.index)),
        file,
        m.line,
        m.label,
        verdict,
    );
    println!("  failures: {}, errors: {}, {}ms", m.failures, m.errors, m.duration_ms);
    if let Some(error) = &m.error {
        println!("  error: {error}");
    }
    println!();
    for line in m.diff.lines() {
        if line.starts_with('-') {
            println!("  {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("  {}", Style::new().green().apply_to(line));
        }
    }
}

/// One line per mutant that `run` would execute.
pub fn print_mutant_list(mutants: &[Mutant], source: &str) {
    let ref_style = Style::new().cyan().bold();
    let loc_style = Style::new().dim();
    for m in mutants {
        println!(
            "  {} line {} {} {}",
            ref_style.apply_to(format!("@m{}", m.index)),
            m.line,
            loc_style.apply_to(format!("[{}]", m.label)),
            crate::runner::line_text(&m.apply_to(source), m.line),
        );
    }
    println!();
    println!("{} mutants", mutants.len());
}
