//! JSON and Markdown artifacts exchanged between pipeline stages on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::attention::{AttentionSnapshot, AttentionSummary};
use crate::config::ArtifactConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::keywords::{KeywordSummary, TokenKeyframes};
use crate::pipeline::TraceEntry;
use crate::tracer::EntropyRecord;
use crate::trigger::TriggerDecision;

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ProbeResult<()> {
    ensure_parent(path)?;
    let json =
        serde_json::to_string_pretty(value).map_err(|err| ProbeError::serialization(path, err))?;
    fs::write(path, json).map_err(|err| ProbeError::io(path, err))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> ProbeResult<T> {
    let text = fs::read_to_string(path).map_err(|err| ProbeError::io(path, err))?;
    serde_json::from_str(&text).map_err(|err| ProbeError::serialization(path, err))
}

pub fn write_text(path: &Path, text: &str) -> ProbeResult<()> {
    ensure_parent(path)?;
    fs::write(path, text).map_err(|err| ProbeError::io(path, err))
}

fn ensure_parent(path: &Path) -> ProbeResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|err| ProbeError::io(parent, err))
        }
        _ => Ok(()),
    }
}

/// Typed access to the artifact files named by an [`ArtifactConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ArtifactStore<'a> {
    config: &'a ArtifactConfig,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(config: &'a ArtifactConfig) -> Self {
        Self { config }
    }

    pub fn entropy_trace_path(&self) -> PathBuf {
        self.config.resolve(&self.config.entropy_trace)
    }

    pub fn attention_summary_path(&self) -> PathBuf {
        self.config.resolve(&self.config.attention_summary)
    }

    pub fn attention_paths_path(&self) -> PathBuf {
        self.config.resolve(&self.config.attention_paths)
    }

    pub fn jump_matrix_path(&self) -> PathBuf {
        self.config.resolve(&self.config.jump_matrix)
    }

    pub fn keywords_path(&self) -> PathBuf {
        self.config.resolve(&self.config.keywords)
    }

    pub fn keyframes_path(&self) -> PathBuf {
        self.config.resolve(&self.config.keyframes)
    }

    pub fn decision_path(&self) -> PathBuf {
        self.config.resolve(&self.config.decision)
    }

    pub fn trace_path(&self) -> PathBuf {
        self.config.resolve(&self.config.trace)
    }

    pub fn report_path(&self) -> PathBuf {
        self.config.resolve(&self.config.report)
    }

    pub fn write_entropy_trace(&self, records: &[EntropyRecord]) -> ProbeResult<PathBuf> {
        self.write(self.entropy_trace_path(), records)
    }

    pub fn write_attention_summary(&self, summary: &[AttentionSummary]) -> ProbeResult<PathBuf> {
        self.write(self.attention_summary_path(), summary)
    }

    pub fn write_attention_paths(&self, snapshots: &[AttentionSnapshot]) -> ProbeResult<PathBuf> {
        self.write(self.attention_paths_path(), snapshots)
    }

    pub fn write_jump_matrix(&self, matrix: &[Vec<f64>]) -> ProbeResult<PathBuf> {
        self.write(self.jump_matrix_path(), matrix)
    }

    pub fn write_keywords(&self, keywords: &KeywordSummary) -> ProbeResult<PathBuf> {
        self.write(self.keywords_path(), keywords)
    }

    pub fn write_keyframes(&self, keyframes: &TokenKeyframes) -> ProbeResult<PathBuf> {
        self.write(self.keyframes_path(), keyframes)
    }

    pub fn write_decision(&self, decision: &TriggerDecision) -> ProbeResult<PathBuf> {
        self.write(self.decision_path(), decision)
    }

    pub fn write_trace(&self, trace: &[TraceEntry]) -> ProbeResult<PathBuf> {
        self.write(self.trace_path(), trace)
    }

    pub fn write_report(&self, markdown: &str) -> ProbeResult<PathBuf> {
        let path = self.report_path();
        write_text(&path, markdown)?;
        info!("wrote {}", path.display());
        Ok(path)
    }

    pub fn read_entropy_trace(&self) -> ProbeResult<Vec<EntropyRecord>> {
        read_json(&self.entropy_trace_path())
    }

    pub fn read_attention_summary(&self) -> ProbeResult<Vec<AttentionSummary>> {
        read_json(&self.attention_summary_path())
    }

    pub fn read_attention_paths(&self) -> ProbeResult<Vec<AttentionSnapshot>> {
        read_json(&self.attention_paths_path())
    }

    pub fn read_keyframes(&self) -> ProbeResult<TokenKeyframes> {
        read_json(&self.keyframes_path())
    }

    pub fn read_keywords(&self) -> ProbeResult<KeywordSummary> {
        read_json(&self.keywords_path())
    }

    pub fn read_decision(&self) -> ProbeResult<TriggerDecision> {
        read_json(&self.decision_path())
    }

    pub fn read_trace(&self) -> ProbeResult<Vec<TraceEntry>> {
        read_json(&self.trace_path())
    }

    fn write<T: Serialize + ?Sized>(&self, path: PathBuf, value: &T) -> ProbeResult<PathBuf> {
        write_json(&path, value)?;
        info!("wrote {}", path.display());
        Ok(path)
    }
}
