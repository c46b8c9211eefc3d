//! Reflection trigger: fuses entropy drops, attention jumps and keyword hits
//! into a bounded confidence and a yes/no decision.

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attention::AttentionSummary;
use crate::config::{RefinementConfig, TriggerConfig};
use crate::error::{ProbeError, ProbeResult};
use crate::keywords::KeywordSummary;
use crate::tracer::EntropyRecord;

const DROP_WEIGHT: f64 = 0.4;
const JUMP_WEIGHT: f64 = 0.4;
const KEYWORD_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub turn: usize,
    pub trigger: bool,
    pub confidence: f64,
    pub reason: String,
    pub target_layer: i64,
    #[serde(default)]
    pub awakening_log: Vec<String>,
}

/// Evidence gathered from the three signals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evidence {
    /// Turns `t` where entropy fell from `t - 1` by more than the threshold.
    pub drop_turns: Vec<usize>,
    pub jump_count: usize,
    pub keyword_hits: usize,
    pub turn_count: usize,
}

impl Evidence {
    pub fn drop_count(&self) -> usize {
        self.drop_turns.len()
    }

    fn drop_rate(&self) -> f64 {
        self.drop_count() as f64 / self.turn_count.saturating_sub(1).max(1) as f64
    }

    fn jump_rate(&self) -> f64 {
        self.jump_count as f64 / self.turn_count.max(1) as f64
    }

    fn keyword_rate(&self) -> f64 {
        self.keyword_hits as f64 / self.turn_count.max(1) as f64
    }
}

/// Weighted evidence before refinement, clamped to `[0, 1]`.
pub fn baseline_confidence(evidence: &Evidence) -> f64 {
    let raw = DROP_WEIGHT * evidence.drop_rate()
        + JUMP_WEIGHT * evidence.jump_rate()
        + KEYWORD_WEIGHT * evidence.keyword_rate();
    raw.clamp(0.0, 1.0)
}

/// Lower is better: confidence is rewarded more strongly the more drops and
/// jumps back it.
fn energy(confidence: f64, evidence: &Evidence) -> f64 {
    -confidence * (1.0 + evidence.drop_rate() + evidence.jump_rate())
}

/// Metropolis jitter confined to `[baseline - radius, baseline + radius]`
/// intersected with `[0, 1]`. Returns the final state of the walk.
pub fn refine_confidence(baseline: f64, evidence: &Evidence, refinement: &RefinementConfig) -> f64 {
    let RefinementConfig::Jitter {
        steps,
        radius,
        temperature,
        seed,
    } = refinement
    else {
        return baseline;
    };

    let low = (baseline - radius).max(0.0);
    let high = (baseline + radius).min(1.0);
    if high <= low {
        return baseline;
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(*seed),
        None => StdRng::from_entropy(),
    };

    let mut current = baseline;
    let mut current_energy = energy(current, evidence);
    for _ in 0..*steps {
        let candidate = (current + rng.gen_range(-radius..=*radius)).clamp(low, high);
        let candidate_energy = energy(candidate, evidence);
        let delta = candidate_energy - current_energy;
        if delta <= 0.0 || rng.r#gen::<f64>() < (-delta / temperature).exp() {
            current = candidate;
            current_energy = candidate_energy;
        }
    }
    current.clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct ReflectionTrigger {
    config: TriggerConfig,
    target_layer: i64,
    /// Salient terms normalised the way keywords are.
    salient_terms: Vec<String>,
}

impl ReflectionTrigger {
    /// Salient terms are lowercased to match the default keyword extractor;
    /// see [`ReflectionTrigger::with_lowercase`].
    pub fn new(config: TriggerConfig, target_layer: i64) -> Self {
        let salient_terms = normalize_terms(&config.salient_terms, true);
        Self {
            config,
            target_layer,
            salient_terms,
        }
    }

    /// Match the keyword extractor's case folding.
    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.salient_terms = normalize_terms(&self.config.salient_terms, lowercase);
        self
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn entropy_drops(&self, entropy: &[EntropyRecord]) -> Vec<usize> {
        entropy
            .windows(2)
            .filter(|pair| pair[0].entropy - pair[1].entropy > self.config.entropy_drop_threshold)
            .map(|pair| pair[1].turn)
            .collect()
    }

    /// Turns whose strongest head jump stands more than `jump_threshold`
    /// standard deviations above the dialogue's jump pool.
    pub fn significant_jumps(&self, attention: &[AttentionSummary]) -> usize {
        attention
            .iter()
            .filter(|summary| summary.max_jump_sigma > self.config.jump_threshold)
            .count()
    }

    /// Turns where some salient term is spelled out by that turn's keywords.
    /// Keywords are single tokens, so "觉醒" is found when both "觉" and "醒"
    /// made the top-k.
    pub fn keyword_hits(&self, keywords: &KeywordSummary) -> usize {
        keywords
            .iter()
            .filter(|(_, turn)| {
                self.salient_terms
                    .iter()
                    .any(|term| spelled_by(term, &turn.keywords))
            })
            .count()
    }

    pub fn gather(
        &self,
        entropy: &[EntropyRecord],
        attention: &[AttentionSummary],
        keywords: &KeywordSummary,
    ) -> ProbeResult<Evidence> {
        validate_alignment(entropy, attention, keywords)?;
        Ok(Evidence {
            drop_turns: self.entropy_drops(entropy),
            jump_count: self.significant_jumps(attention),
            keyword_hits: self.keyword_hits(keywords),
            turn_count: entropy.len(),
        })
    }

    pub fn evaluate(
        &self,
        entropy: &[EntropyRecord],
        attention: &[AttentionSummary],
        keywords: &KeywordSummary,
    ) -> ProbeResult<TriggerDecision> {
        let evidence = self.gather(entropy, attention, keywords)?;
        let baseline = baseline_confidence(&evidence);
        let confidence = refine_confidence(baseline, &evidence, &self.config.refinement);

        let fired = evidence.drop_count() >= self.config.min_drops
            || evidence.jump_count >= self.config.min_jumps
            || evidence.keyword_hits >= self.config.min_keyword_hits;
        let trigger = fired && confidence >= self.config.min_confidence;
        debug!(
            drops = evidence.drop_count(),
            jumps = evidence.jump_count,
            hits = evidence.keyword_hits,
            baseline,
            confidence,
            trigger,
            "evaluated reflection trigger"
        );

        Ok(TriggerDecision {
            turn: entropy.last().map(|record| record.turn).unwrap_or(0),
            trigger,
            confidence,
            reason: reason_tag(&evidence),
            target_layer: self.target_layer,
            awakening_log: evidence_log(&evidence, confidence, trigger),
        })
    }
}

fn normalize_terms(terms: &[String], lowercase: bool) -> Vec<String> {
    terms
        .iter()
        .map(|term| {
            let compact: String = term.split_whitespace().collect();
            if lowercase {
                compact.to_lowercase()
            } else {
                compact
            }
        })
        .filter(|term| !term.is_empty())
        .collect()
}

/// True when `term` is a concatenation of one or more `keywords`.
fn spelled_by(term: &str, keywords: &[String]) -> bool {
    let mut reachable = vec![false; term.len() + 1];
    reachable[0] = true;
    for start in 0..term.len() {
        if !reachable[start] {
            continue;
        }
        for keyword in keywords {
            if !keyword.is_empty() && term[start..].starts_with(keyword.as_str()) {
                reachable[start + keyword.len()] = true;
            }
        }
    }
    !term.is_empty() && reachable[term.len()]
}

fn validate_alignment(
    entropy: &[EntropyRecord],
    attention: &[AttentionSummary],
    keywords: &KeywordSummary,
) -> ProbeResult<()> {
    if let Some((idx, record)) = entropy
        .iter()
        .enumerate()
        .find(|(idx, record)| record.turn != *idx)
    {
        return Err(ProbeError::Validation(format!(
            "entropy trace position {idx} holds turn {}",
            record.turn
        )));
    }
    if attention.len() != entropy.len() {
        return Err(ProbeError::Validation(format!(
            "attention summary covers {} turns, entropy trace {}",
            attention.len(),
            entropy.len()
        )));
    }
    if let Some((idx, summary)) = attention
        .iter()
        .enumerate()
        .find(|(idx, summary)| summary.turn != *idx)
    {
        return Err(ProbeError::Validation(format!(
            "attention summary position {idx} holds turn {}",
            summary.turn
        )));
    }
    keywords.ensure_turns(entropy.len())
}

/// Machine-readable tag naming each kind of evidence present.
pub fn reason_tag(evidence: &Evidence) -> String {
    let mut reasons = Vec::new();
    if !evidence.drop_turns.is_empty() {
        reasons.push(format!("entropy_drops_at_turns_{:?}", evidence.drop_turns));
    }
    if evidence.jump_count > 0 {
        reasons.push(format!("jump_scores_{}", evidence.jump_count));
    }
    if evidence.keyword_hits > 0 {
        reasons.push(format!("keywords_detected_{}", evidence.keyword_hits));
    }
    if reasons.is_empty() {
        "no_significant_changes".to_string()
    } else {
        reasons.join("_and_")
    }
}

fn evidence_log(evidence: &Evidence, confidence: f64, trigger: bool) -> Vec<String> {
    let mut log = Vec::new();
    if !evidence.drop_turns.is_empty() {
        log.push(format!(
            "entropy dropped sharply entering turns {:?}",
            evidence.drop_turns
        ));
    }
    if evidence.jump_count > 0 {
        log.push(format!(
            "{} turn(s) show attention jumps above threshold",
            evidence.jump_count
        ));
    }
    if evidence.keyword_hits > 0 {
        log.push(format!(
            "{} turn(s) surface salient keywords",
            evidence.keyword_hits
        ));
    }
    log.push(format!(
        "confidence {confidence:.3}: reflection {}",
        if trigger { "triggered" } else { "not triggered" }
    ));
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(drops: usize, jumps: usize, hits: usize, turns: usize) -> Evidence {
        Evidence {
            drop_turns: (1..=drops).collect(),
            jump_count: jumps,
            keyword_hits: hits,
            turn_count: turns,
        }
    }

    #[test]
    fn baseline_follows_weighted_rates() {
        // 0.4 * 1/2 + 0.4 * 1/3 + 0.2 * 1/3
        let value = baseline_confidence(&evidence(1, 1, 1, 3));
        assert!((value - (0.2 + 0.4 / 3.0 + 0.2 / 3.0)).abs() < 1e-12);
        assert_eq!(baseline_confidence(&evidence(0, 0, 0, 0)), 0.0);
    }

    #[test]
    fn single_turn_denominators_floor_at_one() {
        let value = baseline_confidence(&evidence(0, 1, 1, 1));
        assert!((value - 0.6).abs() < 1e-12);
    }

    #[test]
    fn jitter_stays_within_radius_and_unit_interval() {
        let refinement = RefinementConfig::Jitter {
            steps: 200,
            radius: 0.1,
            temperature: 0.1,
            seed: Some(7),
        };
        for baseline in [0.0, 0.05, 0.5, 0.97, 1.0] {
            let refined = refine_confidence(baseline, &evidence(1, 1, 0, 3), &refinement);
            assert!((0.0..=1.0).contains(&refined));
            assert!((refined - baseline).abs() <= 0.1 + 1e-12);
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let refinement = RefinementConfig::Jitter {
            steps: 50,
            radius: 0.1,
            temperature: 0.1,
            seed: Some(42),
        };
        let ev = evidence(2, 0, 1, 4);
        let a = refine_confidence(0.4, &ev, &refinement);
        let b = refine_confidence(0.4, &ev, &refinement);
        assert_eq!(a, b);
    }

    #[test]
    fn salient_terms_are_spelled_from_token_keywords() {
        let keywords = |raw: &[&str]| raw.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        assert!(spelled_by("觉醒", &keywords(&["醒", "觉"])));
        assert!(spelled_by("理解", &keywords(&["理解"])));
        assert!(!spelled_by("意识", &keywords(&["意", "和"])));
        assert!(spelled_by("aa", &keywords(&["a"])));
        assert!(!spelled_by("", &keywords(&["a"])));
    }

    #[test]
    fn salient_terms_follow_keyword_case_folding() {
        assert_eq!(
            normalize_terms(&["Deep Focus".into(), "  ".into()], true),
            vec!["deepfocus"]
        );
        assert_eq!(normalize_terms(&["E".into()], false), vec!["E"]);
    }

    #[test]
    fn reason_concatenates_fired_signals() {
        assert_eq!(reason_tag(&evidence(0, 0, 0, 3)), "no_significant_changes");
        assert_eq!(
            reason_tag(&evidence(2, 3, 1, 4)),
            "entropy_drops_at_turns_[1, 2]_and_jump_scores_3_and_keywords_detected_1"
        );
    }
}
