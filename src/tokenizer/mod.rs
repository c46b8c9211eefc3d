pub mod byte;
pub mod char_vocab;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use byte::ByteTokenizer;
use char_vocab::CharVocab;

/// Vocabulary shared by the model, the entropy tracer and the keyword extractor.
///
/// Keywords are drawn from the same token inventory the model sees, so every
/// stage that needs "terms" goes through this trait.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<u32>;
    fn decode(&self, ids: &[u32]) -> String;
    /// Surface form of a single non-special token.
    fn token_text(&self, id: u32) -> Option<String>;
    fn len(&self) -> usize;
    fn bos_id(&self) -> Option<u32>;
    fn eos_id(&self) -> Option<u32>;
    fn pad_id(&self) -> Option<u32>;
    fn unk_id(&self) -> Option<u32>;
    fn as_any(&self) -> &dyn std::any::Any;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Surface terms of an encoded sequence with specials dropped. One term
    /// per token unless a tokenizer splits characters across tokens.
    fn terms(&self, ids: &[u32]) -> Vec<String> {
        ids.iter().filter_map(|&id| self.token_text(id)).collect()
    }

    fn is_special(&self, id: u32) -> bool {
        [self.bos_id(), self.eos_id(), self.pad_id(), self.unk_id()]
            .into_iter()
            .flatten()
            .any(|special| special == id)
    }
}

pub type SharedTokenizer = Arc<dyn Tokenizer>;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub vocab_path: Option<PathBuf>,
    #[serde(flatten)]
    pub kind: TokenizerKind,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            vocab_path: None,
            kind: TokenizerKind::Char(CharTokenizerConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenizerKind {
    Char(CharTokenizerConfig),
    Byte(ByteTokenizerConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CharTokenizerConfig {
    #[serde(default = "default_true")]
    pub include_unknown: bool,
}

impl Default for CharTokenizerConfig {
    fn default() -> Self {
        Self {
            include_unknown: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ByteTokenizerConfig {
    #[serde(default = "default_true")]
    pub add_special_tokens: bool,
}

impl Default for ByteTokenizerConfig {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
        }
    }
}

impl TokenizerConfig {
    /// Where a fitted vocabulary lives, if this tokenizer kind needs one.
    pub fn storage_path(&self, base_dir: &Path) -> Option<PathBuf> {
        match &self.kind {
            TokenizerKind::Char(_) => Some(match &self.vocab_path {
                Some(path) if path.is_absolute() => path.clone(),
                Some(path) => base_dir.join(path),
                None => base_dir.join("vocab.json"),
            }),
            TokenizerKind::Byte(_) => None,
        }
    }

    pub fn load(&self, path: &Path) -> Result<SharedTokenizer> {
        match &self.kind {
            TokenizerKind::Char(_) => {
                let vocab = CharVocab::load(path)?;
                Ok(Arc::new(vocab) as SharedTokenizer)
            }
            TokenizerKind::Byte(config) => {
                Ok(Arc::new(ByteTokenizer::new(config.add_special_tokens)) as SharedTokenizer)
            }
        }
    }

    pub fn fit<'a, I>(&self, texts: I) -> Result<SharedTokenizer>
    where
        I: Iterator<Item = &'a str>,
    {
        match &self.kind {
            TokenizerKind::Char(config) => {
                let vocab = CharVocab::fit(texts, config.include_unknown)?;
                Ok(Arc::new(vocab) as SharedTokenizer)
            }
            TokenizerKind::Byte(config) => {
                Ok(Arc::new(ByteTokenizer::new(config.add_special_tokens)) as SharedTokenizer)
            }
        }
    }

    pub fn save(&self, tokenizer: &dyn Tokenizer, path: &Path) -> Result<()> {
        match &self.kind {
            TokenizerKind::Char(_) => {
                let vocab = tokenizer
                    .as_any()
                    .downcast_ref::<CharVocab>()
                    .ok_or_else(|| anyhow!("expected char tokenizer"))?;
                vocab.save(path)
            }
            TokenizerKind::Byte(_) => Ok(()),
        }
    }

    /// Load the persisted vocabulary when present, otherwise fit it on `texts`
    /// and persist it for the next run.
    pub fn load_or_fit<'a, I>(&self, base_dir: &Path, texts: I) -> Result<SharedTokenizer>
    where
        I: Iterator<Item = &'a str>,
    {
        match self.storage_path(base_dir) {
            Some(path) if path.is_file() => {
                let texts: Vec<&str> = texts.collect();
                let tokenizer = self
                    .load(&path)
                    .with_context(|| format!("failed to load tokenizer {}", path.display()))?;
                if let Some(vocab) = tokenizer.as_any().downcast_ref::<CharVocab>() {
                    let missing = vocab.missing_chars(texts.iter().copied());
                    if !missing.is_empty() {
                        warn!(
                            "Vocabulary {} lacks {} character(s) used by this dialogue; extending it",
                            path.display(),
                            missing.len()
                        );
                        let grown = vocab.extended(texts.iter().copied())?;
                        grown.save(&path)?;
                        return Ok(Arc::new(grown) as SharedTokenizer);
                    }
                }
                info!(
                    "Loaded {} tokenizer with {} tokens from {}",
                    self.kind_name(),
                    tokenizer.len(),
                    path.display()
                );
                Ok(tokenizer)
            }
            Some(path) => {
                let tokenizer = self.fit(texts)?;
                self.save(tokenizer.as_ref(), &path)?;
                info!(
                    "Built {} tokenizer with {} tokens at {}",
                    self.kind_name(),
                    tokenizer.len(),
                    path.display()
                );
                Ok(tokenizer)
            }
            None => {
                let tokenizer = self.fit(texts)?;
                info!(
                    "Initialized {} tokenizer with {} tokens (no persistence required)",
                    self.kind_name(),
                    tokenizer.len()
                );
                Ok(tokenizer)
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            TokenizerKind::Char(_) => "char",
            TokenizerKind::Byte(_) => "byte",
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stored_vocabulary_grows_with_new_dialogue() {
        let dir = tempdir().expect("tempdir");
        let config = TokenizerConfig::default();
        let first = config
            .load_or_fit(dir.path(), ["hello world"].into_iter())
            .expect("fit");
        let h = first.encode("h", false, false);

        let second = config
            .load_or_fit(dir.path(), ["你好", "觉醒"].into_iter())
            .expect("reload");
        let ids = second.encode("你好", false, false);
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|&id| Some(id) != second.unk_id()));
        assert_ne!(ids[0], ids[1]);
        assert_eq!(second.encode("h", false, false), h);

        let stored = CharVocab::load(dir.path().join("vocab.json")).expect("stored");
        assert!(stored.contains('觉'));
        assert_eq!(stored.len(), second.len());
    }
}
