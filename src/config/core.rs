use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult};
use crate::model::BDHConfig;
use crate::positional::RotaryEmbedding;
use crate::tokenizer::TokenizerConfig;

/// Full configuration surface of the reflection pipeline. Every section and
/// every field is optional in TOML.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct ProbeConfig {
    pub model: ModelConfig,
    pub tokenizer: TokenizerConfig,
    pub tracer: TracerConfig,
    pub jump: JumpConfig,
    pub keywords: KeywordConfig,
    pub trigger: TriggerConfig,
    pub artifacts: ArtifactConfig,
}

impl ProbeConfig {
    pub fn from_toml_str(text: &str) -> ProbeResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| ProbeError::Config(format!("failed to parse configuration: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProbeResult<()> {
        self.model.validate()?;
        self.tracer.validate()?;
        self.jump.validate()?;
        self.keywords.validate()?;
        self.trigger.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Identifier echoed into logs and reports; not used for lookup.
    pub name: String,
    pub n_layer: usize,
    pub n_embd: usize,
    pub n_head: usize,
    pub mlp_internal_dim_multiplier: usize,
    pub rope_theta: f32,
    pub relu_threshold: f32,
    pub rotary_embedding: RotaryEmbedding,
    pub checkpoint: Option<PathBuf>,
    pub seed: u64,
    /// Layer whose attention feeds the jump detector; negative counts from the end.
    pub attention_layer: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "bdh-char-small".into(),
            n_layer: 2,
            n_embd: 64,
            n_head: 4,
            mlp_internal_dim_multiplier: 4,
            rope_theta: 65_536.0,
            relu_threshold: 0.0,
            rotary_embedding: RotaryEmbedding::Rope,
            checkpoint: None,
            seed: 1337,
            attention_layer: -1,
        }
    }
}

impl ModelConfig {
    pub fn to_bdh(&self, vocab_size: usize) -> BDHConfig {
        BDHConfig {
            n_layer: self.n_layer,
            n_embd: self.n_embd,
            n_head: self.n_head,
            mlp_internal_dim_multiplier: self.mlp_internal_dim_multiplier,
            vocab_size,
            rope_theta: self.rope_theta,
            relu_threshold: self.relu_threshold,
            rotary_embedding: self.rotary_embedding,
        }
    }

    fn validate(&self) -> ProbeResult<()> {
        let bdh = self.to_bdh(1);
        bdh.validate()?;
        bdh.resolve_layer(self.attention_layer)?;
        Ok(())
    }
}

/// How much of the dialogue the model sees when scoring a turn.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextMode {
    /// Each utterance is scored on its own.
    #[default]
    Independent,
    /// Turn `t` is scored on turns `0..=t` joined by the separator.
    Cumulative,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextStrategyConfig {
    #[default]
    Infinite,
    Sliding {
        window: usize,
    },
}

impl ContextStrategyConfig {
    pub fn window(&self) -> Option<usize> {
        match self {
            Self::Infinite => None,
            Self::Sliding { window } => Some(*window),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TracerConfig {
    pub context: ContextMode,
    pub window: ContextStrategyConfig,
    pub separator: String,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            context: ContextMode::Independent,
            window: ContextStrategyConfig::Infinite,
            separator: "\n".into(),
        }
    }
}

impl TracerConfig {
    fn validate(&self) -> ProbeResult<()> {
        if self.window.window() == Some(0) {
            return Err(ProbeError::Config(
                "sliding window must keep at least one token".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct JumpConfig {
    pub sigma_multiplier: f64,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            sigma_multiplier: 1.5,
        }
    }
}

impl JumpConfig {
    fn validate(&self) -> ProbeResult<()> {
        ensure_non_negative("jump.sigma_multiplier", self.sigma_multiplier)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct KeywordConfig {
    pub top_k: usize,
    pub lowercase: bool,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            lowercase: true,
        }
    }
}

impl KeywordConfig {
    fn validate(&self) -> ProbeResult<()> {
        if self.top_k == 0 {
            return Err(ProbeError::Config("keywords.top_k must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    #[serde(alias = "entropy_threshold")]
    pub entropy_drop_threshold: f64,
    /// In standard deviations of the dialogue's per-head jump scores.
    pub jump_threshold: f64,
    pub min_confidence: f64,
    /// Whole words; a turn hits when its keyword tokens spell one out.
    pub salient_terms: Vec<String>,
    pub min_drops: usize,
    pub min_jumps: usize,
    pub min_keyword_hits: usize,
    pub refinement: RefinementConfig,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            entropy_drop_threshold: 1.0,
            jump_threshold: 1.5,
            min_confidence: 0.7,
            salient_terms: vec!["觉醒".into(), "理解".into(), "意识".into()],
            min_drops: 2,
            min_jumps: 2,
            min_keyword_hits: 1,
            refinement: RefinementConfig::default(),
        }
    }
}

impl TriggerConfig {
    fn validate(&self) -> ProbeResult<()> {
        ensure_non_negative("trigger.entropy_drop_threshold", self.entropy_drop_threshold)?;
        ensure_non_negative("trigger.jump_threshold", self.jump_threshold)?;
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ProbeError::Config(format!(
                "trigger.min_confidence must lie in [0, 1], got {}",
                self.min_confidence
            )));
        }
        self.refinement.validate()
    }
}

/// Post-processing applied to the weighted confidence before the decision.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefinementConfig {
    None,
    /// Bounded Metropolis jitter around the baseline confidence.
    Jitter {
        #[serde(default = "default_jitter_steps")]
        steps: usize,
        #[serde(default = "default_jitter_radius")]
        radius: f64,
        #[serde(default = "default_jitter_temperature")]
        temperature: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self::Jitter {
            steps: default_jitter_steps(),
            radius: default_jitter_radius(),
            temperature: default_jitter_temperature(),
            seed: None,
        }
    }
}

impl RefinementConfig {
    fn validate(&self) -> ProbeResult<()> {
        if let Self::Jitter {
            radius,
            temperature,
            ..
        } = self
        {
            ensure_non_negative("trigger.refinement.radius", *radius)?;
            if !(temperature.is_finite() && *temperature > 0.0) {
                return Err(ProbeError::Config(format!(
                    "trigger.refinement.temperature must be positive, got {temperature}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub entropy_trace: PathBuf,
    pub attention_summary: PathBuf,
    /// Raw per-turn, per-head attention rows the jump detector reads.
    pub attention_paths: PathBuf,
    pub jump_matrix: PathBuf,
    pub keyframes: PathBuf,
    pub keywords: PathBuf,
    pub decision: PathBuf,
    pub trace: PathBuf,
    pub report: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
            entropy_trace: PathBuf::from("entropy_trace.json"),
            attention_summary: PathBuf::from("attention_summary.json"),
            attention_paths: PathBuf::from("attention_paths_raw.json"),
            jump_matrix: PathBuf::from("attention_jump_matrix.json"),
            keyframes: PathBuf::from("token_keyframe_map.json"),
            keywords: PathBuf::from("tfidf_keywords.json"),
            decision: PathBuf::from("reflection_signal.json"),
            trace: PathBuf::from("trace.json"),
            report: PathBuf::from("explanation_log.md"),
        }
    }
}

impl ArtifactConfig {
    /// Rooted at `dir` unless `file` is already absolute.
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.dir.join(file)
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }
}

fn ensure_non_negative(name: &str, value: f64) -> ProbeResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ProbeError::Config(format!(
            "{name} must be a finite non-negative number, got {value}"
        )))
    }
}

fn default_jitter_steps() -> usize {
    50
}

fn default_jitter_radius() -> f64 {
    0.1
}

fn default_jitter_temperature() -> f64 {
    0.1
}
