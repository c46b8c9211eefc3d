#![recursion_limit = "256"]

pub mod artifacts;
pub mod attention;
pub mod config;
pub mod entropy;
pub mod error;
pub mod keywords;
pub mod model;
pub mod pipeline;
pub mod positional;
pub mod probe;
pub mod report;
pub mod tokenizer;
pub mod tracer;
pub mod trigger;

pub use artifacts::ArtifactStore;
pub use attention::{
    AttentionHistory, AttentionSnapshot, AttentionSummary, JumpDetector, JumpEvent,
    JumpStatistics, jump_matrix, jump_score, summarize,
};
pub use config::{
    ArtifactConfig, ContextMode, ContextStrategyConfig, JumpConfig, KeywordConfig, ModelConfig,
    ProbeConfig, RefinementConfig, TracerConfig, TriggerConfig, load_probe_config,
};
pub use entropy::{softmax, token_entropy};
pub use error::{ProbeError, ProbeResult};
pub use keywords::{KeywordExtractor, KeywordSummary, TokenKeyframes, TurnKeywords};
pub use model::{BDH, BDHConfig, ModelState};
pub use pipeline::{
    PipelineOutput, ReflectionPipeline, TraceEntry, decide_from_artifacts, integrate_trace,
};
pub use positional::RotaryEmbedding;
pub use probe::{BdhProbe, LanguageProbe, TurnProbe};
pub use tokenizer::char_vocab::CharVocab;
pub use tokenizer::{SharedTokenizer, Tokenizer, TokenizerConfig};
pub use tracer::{
    EntropyRecord, attention_history, attention_snapshots, probe_dialogue, trace_entropy,
};
pub use trigger::{Evidence, ReflectionTrigger, TriggerDecision, baseline_confidence};
