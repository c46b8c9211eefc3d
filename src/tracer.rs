//! Per-turn entropy and attention capture over a dialogue.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attention::{AttentionHistory, AttentionSnapshot};
use crate::config::ContextMode;
use crate::entropy::token_entropy;
use crate::error::{ProbeError, ProbeResult};
use crate::probe::{LanguageProbe, TurnProbe};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyRecord {
    pub turn: usize,
    pub utterance: String,
    pub entropy: f64,
}

/// Text fed to the model for each turn under `mode`.
pub fn turn_inputs<S: AsRef<str>>(dialogue: &[S], mode: ContextMode, separator: &str) -> Vec<String> {
    match mode {
        ContextMode::Independent => dialogue.iter().map(|s| s.as_ref().to_string()).collect(),
        ContextMode::Cumulative => {
            let mut joined = String::new();
            dialogue
                .iter()
                .enumerate()
                .map(|(turn, utterance)| {
                    if turn > 0 {
                        joined.push_str(separator);
                    }
                    joined.push_str(utterance.as_ref());
                    joined.clone()
                })
                .collect()
        }
    }
}

/// One forward pass per turn, in turn order.
pub fn probe_dialogue<P, S>(
    probe: &P,
    dialogue: &[S],
    mode: ContextMode,
    separator: &str,
) -> ProbeResult<Vec<TurnProbe>>
where
    P: LanguageProbe + ?Sized,
    S: AsRef<str>,
{
    turn_inputs(dialogue, mode, separator)
        .iter()
        .enumerate()
        .map(|(turn, text)| {
            let result = probe.probe(text)?;
            debug!(turn, tokens = result.token_count, "probed turn");
            Ok(result)
        })
        .collect()
}

/// Entropy records for probes already taken on `dialogue`.
pub fn entropy_records<S: AsRef<str>>(dialogue: &[S], probes: &[TurnProbe]) -> Vec<EntropyRecord> {
    dialogue
        .iter()
        .zip(probes)
        .enumerate()
        .map(|(turn, (utterance, probe))| EntropyRecord {
            turn,
            utterance: utterance.as_ref().to_string(),
            entropy: token_entropy(&probe.next_token_probs),
        })
        .collect()
}

pub fn trace_entropy<P, S>(
    probe: &P,
    dialogue: &[S],
    mode: ContextMode,
    separator: &str,
) -> ProbeResult<Vec<EntropyRecord>>
where
    P: LanguageProbe + ?Sized,
    S: AsRef<str>,
{
    let probes = probe_dialogue(probe, dialogue, mode, separator)?;
    Ok(entropy_records(dialogue, &probes))
}

pub fn attention_snapshots(probes: &[TurnProbe]) -> Vec<AttentionSnapshot> {
    probes
        .iter()
        .enumerate()
        .flat_map(|(turn, probe)| {
            probe
                .head_attention
                .iter()
                .enumerate()
                .map(move |(head, weights)| AttentionSnapshot {
                    turn,
                    head,
                    weights: weights.clone(),
                })
        })
        .collect()
}

/// History rebuilt from the same snapshots written to the attention paths
/// artifact, so a re-run from disk sees identical rows.
pub fn attention_history(probes: &[TurnProbe]) -> ProbeResult<AttentionHistory> {
    if let Some(turn) = probes.iter().position(|probe| probe.head_attention.is_empty()) {
        return Err(ProbeError::InputShape(format!("turn {turn} has no attention heads")));
    }
    AttentionHistory::from_snapshots(attention_snapshots(probes))
}
