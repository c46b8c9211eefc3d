//! Attention jump detection across dialogue turns.
//!
//! A jump score measures how much one head's attention row moved between two
//! consecutive turns: the shorter row is right-padded with zeros, and the
//! population variance of the elementwise difference is taken. Events are
//! scores that stand out from the whole dialogue's pool by more than
//! `sigma_multiplier` standard deviations.

use serde::{Deserialize, Serialize};

use crate::config::JumpConfig;
use crate::entropy::mean_row_entropy;
use crate::error::{ProbeError, ProbeResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionSnapshot {
    pub turn: usize,
    pub head: usize,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpEvent {
    pub turn: usize,
    pub head: usize,
    pub jump_score: f64,
}

/// Per-turn digest written to the attention summary artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionSummary {
    pub turn: usize,
    pub jump_heads: Vec<usize>,
    pub max_jump_score: f64,
    pub attention_entropy: f64,
    /// `max_jump_score` in standard deviations above the mean of every
    /// per-head jump score in the dialogue; 0.0 for turn 0 or a flat pool.
    #[serde(default)]
    pub max_jump_sigma: f64,
}

/// Attention rows indexed `[turn][head]`, validated to be rectangular in heads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttentionHistory {
    turns: Vec<Vec<Vec<f64>>>,
}

impl AttentionHistory {
    pub fn from_turns(turns: Vec<Vec<Vec<f64>>>) -> ProbeResult<Self> {
        if let Some(first) = turns.first() {
            let heads = first.len();
            if heads == 0 {
                return Err(ProbeError::InputShape("turn 0 has no attention heads".into()));
            }
            for (turn, rows) in turns.iter().enumerate() {
                if rows.len() != heads {
                    return Err(ProbeError::InputShape(format!(
                        "turn {turn} has {} heads, expected {heads}",
                        rows.len()
                    )));
                }
                for (head, weights) in rows.iter().enumerate() {
                    check_weights(turn, head, weights)?;
                }
            }
        }
        Ok(Self { turns })
    }

    /// Group snapshots by turn and head. Turns and heads must both be
    /// contiguous from zero with no duplicates.
    pub fn from_snapshots(mut snapshots: Vec<AttentionSnapshot>) -> ProbeResult<Self> {
        snapshots.sort_by_key(|snapshot| (snapshot.turn, snapshot.head));

        let mut turns: Vec<Vec<Vec<f64>>> = Vec::new();
        for snapshot in snapshots {
            if snapshot.turn == turns.len() {
                turns.push(Vec::new());
            } else if snapshot.turn + 1 != turns.len() {
                return Err(ProbeError::Validation(format!(
                    "attention turns must be contiguous from 0; found turn {} after {}",
                    snapshot.turn,
                    turns.len().saturating_sub(1)
                )));
            }
            let rows = turns.last_mut().ok_or_else(|| {
                ProbeError::Validation(format!("turn {} has no predecessor", snapshot.turn))
            })?;
            if snapshot.head != rows.len() {
                return Err(ProbeError::Validation(format!(
                    "turn {} head {} is duplicated or out of order (expected head {})",
                    snapshot.turn,
                    snapshot.head,
                    rows.len()
                )));
            }
            rows.push(snapshot.weights);
        }

        Self::from_turns(turns)
    }

    pub fn snapshots(&self) -> Vec<AttentionSnapshot> {
        self.turns
            .iter()
            .enumerate()
            .flat_map(|(turn, rows)| {
                rows.iter().enumerate().map(move |(head, weights)| AttentionSnapshot {
                    turn,
                    head,
                    weights: weights.clone(),
                })
            })
            .collect()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn head_count(&self) -> usize {
        self.turns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn turn(&self, turn: usize) -> Option<&[Vec<f64>]> {
        self.turns.get(turn).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// `scores[t - 1][h]` is the jump score of head `h` entering turn `t`.
    pub fn jump_scores(&self) -> Vec<Vec<f64>> {
        self.turns
            .windows(2)
            .map(|pair| {
                pair[0]
                    .iter()
                    .zip(&pair[1])
                    .map(|(prev, curr)| jump_score(prev, curr))
                    .collect()
            })
            .collect()
    }
}

fn check_weights(turn: usize, head: usize, weights: &[f64]) -> ProbeResult<()> {
    if weights.is_empty() {
        return Err(ProbeError::InputShape(format!(
            "turn {turn} head {head} has an empty attention row"
        )));
    }
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(ProbeError::InputShape(format!(
            "turn {turn} head {head} has invalid attention weight {bad}"
        )));
    }
    Ok(())
}

/// Population variance of `curr - prev` after right-padding the shorter row
/// with zeros. Both empty yields `0.0`.
pub fn jump_score(prev: &[f64], curr: &[f64]) -> f64 {
    let len = prev.len().max(curr.len());
    if len == 0 {
        return 0.0;
    }
    let at = |row: &[f64], idx: usize| row.get(idx).copied().unwrap_or(0.0);
    let diffs: Vec<f64> = (0..len).map(|idx| at(curr, idx) - at(prev, idx)).collect();
    let (_, variance) = mean_and_variance(&diffs);
    variance.max(0.0)
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Mean and population standard deviation of a dialogue's jump-score pool.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JumpStatistics {
    pub mean: f64,
    pub std_dev: f64,
}

impl JumpStatistics {
    pub fn from_history(history: &AttentionHistory) -> Self {
        let pool: Vec<f64> = history.jump_scores().into_iter().flatten().collect();
        let (mean, variance) = mean_and_variance(&pool);
        Self {
            mean,
            std_dev: variance.max(0.0).sqrt(),
        }
    }

    /// Distance of `score` above the mean in standard deviations. A flat pool
    /// has no outliers and yields 0.0.
    pub fn sigma(&self, score: f64) -> f64 {
        if self.std_dev > 0.0 {
            (score - self.mean) / self.std_dev
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpDetector {
    pub sigma_multiplier: f64,
}

impl Default for JumpDetector {
    fn default() -> Self {
        Self {
            sigma_multiplier: 1.5,
        }
    }
}

impl From<&JumpConfig> for JumpDetector {
    fn from(config: &JumpConfig) -> Self {
        Self {
            sigma_multiplier: config.sigma_multiplier,
        }
    }
}

impl JumpDetector {
    pub fn new(sigma_multiplier: f64) -> Self {
        Self { sigma_multiplier }
    }

    /// Events over the whole history, ordered by turn then head. Fewer than two
    /// turns, or a pool where every score is identical, yields nothing.
    pub fn detect(&self, history: &AttentionHistory) -> Vec<JumpEvent> {
        let scores = history.jump_scores();
        let pool: Vec<f64> = scores.iter().flatten().copied().collect();
        if pool.is_empty() {
            return Vec::new();
        }
        let min = pool.iter().copied().fold(f64::INFINITY, f64::min);
        let max = pool.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max == min {
            return Vec::new();
        }

        let (mean, variance) = mean_and_variance(&pool);
        let threshold = mean + self.sigma_multiplier * variance.max(0.0).sqrt();

        scores
            .iter()
            .enumerate()
            .flat_map(|(idx, row)| {
                row.iter()
                    .enumerate()
                    .filter(move |(_, score)| **score > threshold)
                    .map(move |(head, score)| JumpEvent {
                        turn: idx + 1,
                        head,
                        jump_score: *score,
                    })
            })
            .collect()
    }
}

/// One row per turn, one column per head; turn 0 has no predecessor and is
/// all zeros.
pub fn jump_matrix(history: &AttentionHistory) -> Vec<Vec<f64>> {
    if history.is_empty() {
        return Vec::new();
    }
    let mut matrix = vec![vec![0.0; history.head_count()]];
    matrix.extend(history.jump_scores());
    matrix
}

pub fn summarize(history: &AttentionHistory, events: &[JumpEvent]) -> Vec<AttentionSummary> {
    let matrix = jump_matrix(history);
    let stats = JumpStatistics::from_history(history);
    (0..history.turn_count())
        .map(|turn| {
            let max_jump_score = matrix[turn].iter().copied().fold(0.0, f64::max);
            AttentionSummary {
                turn,
                jump_heads: events
                    .iter()
                    .filter(|event| event.turn == turn)
                    .map(|event| event.head)
                    .collect(),
                max_jump_score,
                attention_entropy: mean_row_entropy(history.turn(turn).unwrap_or_default()),
                max_jump_sigma: if turn == 0 {
                    0.0
                } else {
                    stats.sigma(max_jump_score)
                },
            }
        })
        .collect()
}
