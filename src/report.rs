//! Human-readable report rendering

use std::fmt::Write;

use crate::types::{Classification, FragilityReport};

/// Render a report as the plain-text "Decision Fragility Report"
pub fn render_text(report: &FragilityReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_report(&mut out, report);
    out
}

fn write_report(out: &mut String, report: &FragilityReport) -> std::fmt::Result {
    writeln!(out, "=== Decision Fragility Report ===")?;
    writeln!(out)?;
    writeln!(out, "User                  : {}", report.user_id)?;
    writeln!(
        out,
        "Period                : {} ({} to {})",
        report.period_id,
        report.period_start.to_rfc3339(),
        report.period_end.to_rfc3339()
    )?;
    writeln!(out, "Total events observed : {}", report.input_event_count)?;

    if report.insufficient_data {
        writeln!(out, "Fragility score       : N/A (not enough events to analyze)")?;
        writeln!(out, "Classification        : {} (insufficient data)", report.classification)?;
    } else {
        writeln!(out, "Fragility score       : {:.4}", report.score)?;
        writeln!(out, "Classification        : {}", report.classification)?;
        writeln!(out)?;
        writeln!(out, "Volatility metrics:")?;
        let m = &report.metrics;
        writeln!(out, "  - reversal rate                  : {:.4}", m.reversal_rate)?;
        writeln!(out, "  - transition entropy             : {:.4}", m.transition_entropy)?;
        writeln!(
            out,
            "  - recency-weighted reversal rate : {:.4}",
            m.recency_weighted_reversal_rate
        )?;
        writeln!(
            out,
            "  - reversals / transitions        : {} / {}",
            m.reversal_count, m.total_transitions
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Per-action event counts:")?;
    if report.action_counts.is_empty() {
        writeln!(out, "  (no events in this period)")?;
    } else {
        for (action, count) in &report.action_counts {
            writeln!(out, "  - {action}: {count}")?;
        }
    }

    writeln!(out)?;
    writeln!(out, "Interpretation:")?;
    writeln!(out, "  {}", interpretation(report))?;
    writeln!(out)?;
    write!(out, "Algorithm: {}", report.algorithm_version)?;
    Ok(())
}

fn interpretation(report: &FragilityReport) -> &'static str {
    if report.insufficient_data {
        return "Not enough events yet to compute a fragility score. \
                Ingest more user actions and re-run the analysis.";
    }
    match report.classification {
        Classification::Low => "Stable behavior with minimal switching or undo patterns.",
        Classification::Medium => "Moderate switching with some backtracking and revision.",
        Classification::High => "Frequent switching: high fragility and instability.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::period::PeriodId;
    use crate::pipeline::score_period;
    use crate::types::{ActionEvent, ActionType};
    use chrono::{Duration, TimeZone, Utc};

    fn report_for(actions: &[ActionType]) -> FragilityReport {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let events: Vec<ActionEvent> = actions
            .iter()
            .enumerate()
            .map(|(i, action)| ActionEvent {
                user_id: "user-1".to_string(),
                action_type: *action,
                timestamp: base + Duration::minutes(i as i64),
                sequence_no: i as u64 + 1,
            })
            .collect();
        let period = PeriodId::parse("2024-01-15").unwrap();
        score_period("user-1", &period, &events, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_render_high_report() {
        use ActionType::*;
        let text = render_text(&report_for(&[AddToCart, RemoveFromCart, AddToCart, RemoveFromCart]));

        assert!(text.starts_with("=== Decision Fragility Report ==="));
        assert!(text.contains("Total events observed : 4"));
        assert!(text.contains("Classification        : HIGH"));
        assert!(text.contains("  - add_to_cart: 2"));
        assert!(text.contains("Frequent switching"));
        assert!(text.ends_with("Algorithm: fragility-v1"));
    }

    #[test]
    fn test_render_insufficient_report() {
        let text = render_text(&report_for(&[]));

        assert!(text.contains("N/A"));
        assert!(text.contains("(no events in this period)"));
        assert!(text.contains("Not enough events yet"));
        assert!(!text.contains("Volatility metrics"));
    }
}
