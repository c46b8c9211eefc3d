pub mod core;
pub mod load;

pub use core::{
    ArtifactConfig, ContextMode, ContextStrategyConfig, JumpConfig, KeywordConfig, ModelConfig,
    ProbeConfig, RefinementConfig, TracerConfig, TriggerConfig,
};
pub use load::load_probe_config;
