use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::attention::{
    AttentionHistory, AttentionSummary, JumpDetector, JumpEvent, jump_matrix, summarize,
};
use crate::config::{ArtifactConfig, ProbeConfig, TracerConfig};
use crate::error::ProbeResult;
use crate::keywords::{KeywordExtractor, KeywordSummary, TokenKeyframes};
use crate::probe::LanguageProbe;
use crate::report;
use crate::tracer::{EntropyRecord, attention_history, entropy_records, probe_dialogue};
use crate::trigger::{ReflectionTrigger, TriggerDecision};

/// One line of the integrated trace log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub turn: usize,
    pub utterance: String,
    pub entropy: f64,
    /// Largest jump score of any head entering this turn.
    pub attention_jump: f64,
    #[serde(default)]
    pub jump_heads: Vec<usize>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

pub fn integrate_trace(
    entropy: &[EntropyRecord],
    attention: &[AttentionSummary],
    keywords: &KeywordSummary,
) -> Vec<TraceEntry> {
    entropy
        .iter()
        .map(|record| {
            let summary = attention.iter().find(|summary| summary.turn == record.turn);
            TraceEntry {
                turn: record.turn,
                utterance: record.utterance.clone(),
                entropy: record.entropy,
                attention_jump: summary.map(|s| s.max_jump_score).unwrap_or(0.0),
                jump_heads: summary.map(|s| s.jump_heads.clone()).unwrap_or_default(),
                keywords: keywords
                    .get(record.turn)
                    .map(|k| k.keywords.clone())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub entropy: Vec<EntropyRecord>,
    pub attention: AttentionHistory,
    pub events: Vec<JumpEvent>,
    pub jump_matrix: Vec<Vec<f64>>,
    pub attention_summary: Vec<AttentionSummary>,
    pub keywords: KeywordSummary,
    pub keyframes: TokenKeyframes,
    pub decision: TriggerDecision,
    pub trace: Vec<TraceEntry>,
}

impl PipelineOutput {
    pub fn report(&self) -> String {
        report::render(&self.trace, &self.decision)
    }

    pub fn write_artifacts(&self, config: &ArtifactConfig) -> ProbeResult<()> {
        let store = ArtifactStore::new(config);
        store.write_entropy_trace(&self.entropy)?;
        store.write_attention_paths(&self.attention.snapshots())?;
        store.write_attention_summary(&self.attention_summary)?;
        store.write_jump_matrix(&self.jump_matrix)?;
        store.write_keywords(&self.keywords)?;
        store.write_keyframes(&self.keyframes)?;
        store.write_decision(&self.decision)?;
        store.write_trace(&self.trace)?;
        store.write_report(&self.report())?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReflectionPipeline {
    tracer: TracerConfig,
    detector: JumpDetector,
    keywords: KeywordExtractor,
    trigger: ReflectionTrigger,
}

impl ReflectionPipeline {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            tracer: config.tracer.clone(),
            detector: JumpDetector::from(&config.jump),
            keywords: KeywordExtractor::from(&config.keywords),
            trigger: ReflectionTrigger::new(config.trigger.clone(), config.model.attention_layer)
                .with_lowercase(config.keywords.lowercase),
        }
    }

    pub fn trigger(&self) -> &ReflectionTrigger {
        &self.trigger
    }

    pub fn run<P, S>(&self, probe: &P, dialogue: &[S]) -> ProbeResult<PipelineOutput>
    where
        P: LanguageProbe + ?Sized,
        S: AsRef<str>,
    {
        let probes = probe_dialogue(probe, dialogue, self.tracer.context, &self.tracer.separator)?;
        let entropy = entropy_records(dialogue, &probes);

        let attention = attention_history(&probes)?;
        let events = self.detector.detect(&attention);
        let jump_matrix = jump_matrix(&attention);
        let attention_summary = summarize(&attention, &events);

        let keywords = self.keywords.extract(probe.tokenizer(), dialogue);
        let keyframes = self.keywords.keyframes(probe.tokenizer(), dialogue);
        let decision = self.trigger.evaluate(&entropy, &attention_summary, &keywords)?;
        let trace = integrate_trace(&entropy, &attention_summary, &keywords);

        info!(
            turns = entropy.len(),
            jump_events = events.len(),
            trigger = decision.trigger,
            confidence = decision.confidence,
            "reflection pipeline finished: {}",
            decision.reason
        );

        Ok(PipelineOutput {
            entropy,
            attention,
            events,
            jump_matrix,
            attention_summary,
            keywords,
            keyframes,
            decision,
            trace,
        })
    }
}

/// Re-run the trigger on artifacts already on disk.
///
/// Jumps are re-detected from the raw attention paths when that artifact
/// exists; otherwise the stored attention summary is used as is.
pub fn decide_from_artifacts(config: &ProbeConfig) -> ProbeResult<TriggerDecision> {
    let store = ArtifactStore::new(&config.artifacts);
    let entropy = store.read_entropy_trace()?;
    let attention = if store.attention_paths_path().is_file() {
        let history = AttentionHistory::from_snapshots(store.read_attention_paths()?)?;
        let events = JumpDetector::from(&config.jump).detect(&history);
        summarize(&history, &events)
    } else {
        warn!(
            "{} not found; using the stored attention summary",
            store.attention_paths_path().display()
        );
        store.read_attention_summary()?
    };
    let keywords = store.read_keywords()?;
    ReflectionTrigger::new(config.trigger.clone(), config.model.attention_layer)
        .with_lowercase(config.keywords.lowercase)
        .evaluate(&entropy, &attention, &keywords)
}
