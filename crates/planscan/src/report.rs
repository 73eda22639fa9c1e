//! Plain-text verdict table for a [`ScanReport`].

use std::fmt;

use crate::{PlanVerdict, ScanReport};

const TOTAL_WIDTH: usize = 120;
const SQL_WIDTH: usize = 90;
const FULL_SCAN_WIDTH: usize = 10;
const COST_WIDTH: usize = 10;

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(TOTAL_WIDTH))?;
        write_row(f, "SQL", "Full Scan", "Cost")?;
        writeln!(f, "{}", "=".repeat(TOTAL_WIDTH))?;
        for outcome in &self.outcomes {
            write_verdict(f, &outcome.verdict)?;
            writeln!(f, "{}", "-".repeat(TOTAL_WIDTH))?;
        }
        Ok(())
    }
}

fn write_verdict(f: &mut fmt::Formatter<'_>, verdict: &PlanVerdict) -> fmt::Result {
    let cost = format!("{:.2}", verdict.estimated_cost);
    let full_scan = verdict.has_full_scan.to_string();
    let lines = wrap(&verdict.sql, SQL_WIDTH);
    let mut lines = lines.iter().map(String::as_str);

    write_row(f, lines.next().unwrap_or(""), &full_scan, &cost)?;
    for line in lines {
        write_row(f, line, "", "")?;
    }
    Ok(())
}

fn write_row(f: &mut fmt::Formatter<'_>, sql: &str, full_scan: &str, cost: &str) -> fmt::Result {
    writeln!(
        f,
        "| {sql:<SQL_WIDTH$} | {full_scan:>FULL_SCAN_WIDTH$} | {cost:>COST_WIDTH$} |"
    )
}

/// Greedy word wrap. A word longer than `width` gets a line of its own.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + word.len() + 1 > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
