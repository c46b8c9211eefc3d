//! Markdown explanation of a traced dialogue and its trigger decision.

use std::fmt::{self, Write};

use crate::pipeline::TraceEntry;
use crate::trigger::TriggerDecision;

const LOW_ENTROPY: f64 = 5.0;
const HIGH_ENTROPY: f64 = 7.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyTrend {
    Falling,
    Rising,
    Stable,
}

impl EntropyTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Falling => "falling",
            Self::Rising => "rising",
            Self::Stable => "stable",
        }
    }
}

/// Direction and magnitude of the mean consecutive entropy change.
pub fn entropy_trend(trace: &[TraceEntry]) -> (EntropyTrend, f64) {
    if trace.len() < 2 {
        return (EntropyTrend::Stable, 0.0);
    }
    let mean_delta = trace
        .windows(2)
        .map(|pair| pair[1].entropy - pair[0].entropy)
        .sum::<f64>()
        / (trace.len() - 1) as f64;
    let trend = if mean_delta < 0.0 {
        EntropyTrend::Falling
    } else if mean_delta > 0.0 {
        EntropyTrend::Rising
    } else {
        EntropyTrend::Stable
    };
    (trend, mean_delta.abs())
}

pub fn entropy_band(entropy: f64) -> &'static str {
    if entropy < LOW_ENTROPY {
        "low uncertainty, information is processed efficiently"
    } else if entropy > HIGH_ENTROPY {
        "high uncertainty, exploratory processing"
    } else {
        "moderate uncertainty, standard processing"
    }
}

pub fn render(trace: &[TraceEntry], decision: &TriggerDecision) -> String {
    let mut out = String::new();
    write_report(&mut out, trace, decision)
        .map(|()| out)
        .unwrap_or_default()
}

pub fn write_report<W: Write>(
    out: &mut W,
    trace: &[TraceEntry],
    decision: &TriggerDecision,
) -> fmt::Result {
    let (trend, delta) = entropy_trend(trace);
    let mean_entropy = if trace.is_empty() {
        0.0
    } else {
        trace.iter().map(|entry| entry.entropy).sum::<f64>() / trace.len() as f64
    };

    writeln!(out, "# Reflection trace report\n")?;
    writeln!(out, "## Entropy overview")?;
    writeln!(out, "- Turns: {}", trace.len())?;
    writeln!(out, "- Trend: {} (Δ={delta:.2} nats)", trend.as_str())?;
    writeln!(out, "- Mean entropy: {mean_entropy:.2} nats\n")?;

    writeln!(out, "## Turn analysis")?;
    for entry in trace {
        writeln!(out, "### Turn {}: \"{}\"", entry.turn, entry.utterance)?;
        writeln!(out, "- **Entropy**: {:.2} nats", entry.entropy)?;
        if entry.jump_heads.is_empty() {
            writeln!(out, "- **Attention**: steady")?;
        } else {
            let heads: Vec<String> = entry.jump_heads.iter().map(|h| format!("#{h}")).collect();
            writeln!(
                out,
                "- **Attention jump**: heads {} (max score {:.4})",
                heads.join(", "),
                entry.attention_jump
            )?;
        }
        writeln!(out, "- **Keywords**: {}", entry.keywords.join(", "))?;
        let mut analysis = entropy_band(entry.entropy).to_string();
        if !entry.jump_heads.is_empty() {
            analysis.push_str("; attention jump detected");
        }
        writeln!(out, "- **Analysis**: {analysis}\n")?;
    }

    writeln!(out, "## Trigger summary")?;
    if decision.trigger {
        writeln!(
            out,
            "- **Reflection triggered**: yes (confidence {:.2}, reason: {})",
            decision.confidence, decision.reason
        )?;
    } else {
        writeln!(
            out,
            "- **Reflection triggered**: no (confidence {:.2})",
            decision.confidence
        )?;
    }
    writeln!(out, "- **Target layer**: {}", decision.target_layer)?;
    for line in &decision.awakening_log {
        writeln!(out, "- {line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(turn: usize, entropy: f64, jump_heads: Vec<usize>) -> TraceEntry {
        TraceEntry {
            turn,
            utterance: format!("u{turn}"),
            entropy,
            attention_jump: if jump_heads.is_empty() { 0.0 } else { 0.9 },
            jump_heads,
            keywords: vec!["k".into()],
        }
    }

    #[test]
    fn trend_uses_mean_consecutive_delta() {
        let (trend, delta) = entropy_trend(&[entry(0, 7.8, vec![]), entry(1, 6.2, vec![])]);
        assert_eq!(trend, EntropyTrend::Falling);
        assert!((delta - 1.6).abs() < 1e-9);
        assert_eq!(entropy_trend(&[entry(0, 1.0, vec![])]).0, EntropyTrend::Stable);
    }

    #[test]
    fn bands_split_at_five_and_seven_and_a_half() {
        assert!(entropy_band(4.9).starts_with("low"));
        assert!(entropy_band(5.0).starts_with("moderate"));
        assert!(entropy_band(7.6).starts_with("high"));
    }

    #[test]
    fn render_lists_every_turn_and_the_decision() {
        let decision = TriggerDecision {
            turn: 1,
            trigger: true,
            confidence: 0.81,
            reason: "jump_scores_2".into(),
            target_layer: -1,
            awakening_log: vec!["confidence 0.810: reflection triggered".into()],
        };
        let text = render(&[entry(0, 2.0, vec![]), entry(1, 8.0, vec![1, 3])], &decision);
        assert!(text.contains("### Turn 0: \"u0\""));
        assert!(text.contains("heads #1, #3"));
        assert!(text.contains("yes (confidence 0.81, reason: jump_scores_2)"));
        assert!(text.contains("- Trend: rising"));
    }

    /// Accepts a fixed number of bytes, then fails every write.
    struct Capped {
        text: String,
        room: usize,
    }

    impl Write for Capped {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if s.len() > self.room {
                return Err(fmt::Error);
            }
            self.room -= s.len();
            self.text.push_str(s);
            Ok(())
        }
    }

    #[test]
    fn write_errors_stop_the_report() {
        let decision = TriggerDecision {
            turn: 0,
            trigger: false,
            confidence: 0.1,
            reason: "no_significant_changes".into(),
            target_layer: -1,
            awakening_log: vec![],
        };
        let mut out = Capped {
            text: String::new(),
            room: 40,
        };
        assert!(write_report(&mut out, &[entry(0, 2.0, vec![])], &decision).is_err());
        assert!(out.text.starts_with("# Reflection trace report"));
        assert!(!out.text.contains("## Turn analysis"));
    }
}
