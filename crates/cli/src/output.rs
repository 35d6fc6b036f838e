//! Output formatting for detection reports

use anyhow::Result;
use std::time::Duration;

use honeysift_common::{DetectionResult, ScanReport};

/// Print a detection report in the specified format
pub fn print_report(report: &ScanReport, format: &str) -> Result<()> {
    let format = format.trim().to_lowercase();
    match format.as_str() {
        "json" | "j" => println!("{}", render_json(report)?),
        "text" | "table" | "t" | "" => print!("{}", render_table(report)),
        _ => {
            eprintln!("Warning: Unknown format '{}', using text format", format);
            print!("{}", render_table(report));
        }
    }
    Ok(())
}

fn render_json(report: &ScanReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn render_table(report: &ScanReport) -> String {
    let mut out = String::new();
    let elapsed = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();

    out.push_str(&format!("\n{:-<80}\n", ""));
    out.push_str(&format!(
        "{:<8} {:<20} {:<10} {:<10} {:<10}\n",
        "PORT", "HONEYPOT", "PROTOCOL", "MATCHED", "CONFIDENCE"
    ));
    out.push_str(&format!("{:-<80}\n", ""));

    let mut results: Vec<&DetectionResult> = report.results.iter().collect();
    results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then(a.port.cmp(&b.port)));
    for result in &results {
        out.push_str(&format!(
            "{:<8} {:<20} {:<10} {:<10} {:<10.3}\n",
            result.port,
            truncate(&result.honeypot, 20),
            result.protocol.as_str(),
            format!("{}/{}", result.matched_steps.len(), result.total_steps),
            result.confidence
        ));
    }
    if results.is_empty() {
        out.push_str("No signature matched.\n");
    }
    out.push_str(&format!("{:-<80}\n", ""));

    out.push_str("\nSummary:\n");
    out.push_str(&format!("  Host: {}\n", report.host));
    out.push_str(&format!(
        "  Open ports: {}\n",
        report
            .open_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    ));
    match &report.best {
        Some(best) => {
            out.push_str(&format!(
                "  Honeypot: {} {} on port {}\n",
                best.name, best.version, best.port
            ));
            if let Some(creds) = &best.credentials {
                out.push_str(&format!("  Credentials: {}:{}\n", creds.username, creds.password));
            }
        }
        None => out.push_str("  Honeypot: none identified\n"),
    }
    if report.cancelled {
        out.push_str("  Scan was interrupted; results are partial\n");
    }
    out.push_str(&format!("  Duration: {}\n\n", format_duration(elapsed)));
    out
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width - 3).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
