//! Human-readable end-of-run summary.

use console::style;

use crate::pipeline::RunSummary;

pub fn print_summaries(summaries: &[RunSummary]) {
    if summaries.is_empty() {
        println!("{} No users were processed", style("!").yellow());
        return;
    }

    println!();
    println!("{}", style("Run summary").bold());
    for summary in summaries {
        let marker = if summary.is_clean() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "  {} {}/{}: {} downloaded, {} extracted, {} skipped, {} failed",
            marker,
            summary.site,
            style(&summary.username).cyan(),
            summary.downloaded,
            summary.extracted,
            summary.skipped,
            summary.failed
        );
        if let Some(ref reason) = summary.aborted {
            println!("      {} {}", style("aborted:").red(), reason);
        }
        for failure in &summary.failures {
            println!(
                "      {} {} ({})",
                style("→").dim(),
                failure.link,
                style(&failure.reason).dim()
            );
        }
    }

    let clean = summaries.iter().filter(|s| s.is_clean()).count();
    println!(
        "\n{} of {} user(s) completed cleanly",
        style(clean).bold(),
        summaries.len()
    );
}
