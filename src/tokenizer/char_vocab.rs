use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

const PAD_CHAR: char = '\u{0000}';
const BOS_CHAR: char = '\u{0001}';
const EOS_CHAR: char = '\u{0002}';
const UNK_CHAR: char = '\u{0003}';

/// Character-level vocabulary. Every Unicode scalar seen while fitting gets
/// its own id, which keeps CJK utterances one token per character.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharVocab {
    id2ch: Vec<char>,
    ch2id: HashMap<char, u32>,
    bos: u32,
    eos: u32,
    pad: u32,
    unk: Option<u32>,
}

impl CharVocab {
    pub fn fit<'a, I>(texts: I, include_unknown: bool) -> Result<Self>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut chars = IndexSet::new();
        chars.insert(PAD_CHAR);
        chars.insert(BOS_CHAR);
        chars.insert(EOS_CHAR);
        if include_unknown {
            chars.insert(UNK_CHAR);
        }
        chars.extend(texts.flat_map(str::chars));

        Self::from_chars(chars.into_iter().collect(), include_unknown)
    }

    /// Append characters of `texts` missing from this vocabulary. Existing ids
    /// keep their values.
    pub fn extended<'a, I>(&self, texts: I) -> Result<Self>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut chars: IndexSet<char> = self.id2ch.iter().copied().collect();
        chars.extend(texts.flat_map(str::chars));
        Self::from_chars(chars.into_iter().collect(), self.unk.is_some())
    }

    /// Distinct characters of `texts` this vocabulary has no id for.
    pub fn missing_chars<'a, I>(&self, texts: I) -> Vec<char>
    where
        I: Iterator<Item = &'a str>,
    {
        let missing: IndexSet<char> = texts
            .flat_map(str::chars)
            .filter(|ch| !self.contains(*ch))
            .collect();
        missing.into_iter().collect()
    }

    fn from_chars(chars: Vec<char>, include_unknown: bool) -> Result<Self> {
        if chars.is_empty() {
            return Err(anyhow!("vocabulary cannot be empty"));
        }

        let mut ch2id = HashMap::with_capacity(chars.len());
        for (idx, &ch) in chars.iter().enumerate() {
            if ch2id.insert(ch, idx as u32).is_some() {
                return Err(anyhow!("duplicate character {ch:?}"));
            }
        }

        let lookup = |ch: char, name: &str| {
            ch2id
                .get(&ch)
                .copied()
                .ok_or_else(|| anyhow!("missing {name} character in vocabulary"))
        };
        let bos = lookup(BOS_CHAR, "BOS")?;
        let eos = lookup(EOS_CHAR, "EOS")?;
        let pad = lookup(PAD_CHAR, "PAD")?;
        let unk = if include_unknown {
            ch2id.get(&UNK_CHAR).copied()
        } else {
            None
        };

        Ok(Self {
            id2ch: chars,
            ch2id,
            bos,
            eos,
            pad,
            unk,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let record = CharVocabRecord {
            chars: self.id2ch.clone(),
            unk: self.unk,
        };
        let json =
            serde_json::to_string_pretty(&record).context("failed to serialize vocabulary")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary {}", path.display()))?;
        Self::from_json_str(&data)
            .with_context(|| format!("failed to parse vocabulary {}", path.display()))
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let record: CharVocabRecord =
            serde_json::from_str(data).context("failed to parse vocabulary json")?;
        Self::from_chars(record.chars, record.unk.is_some())
    }

    /// Unknown characters map to `<unk>` when configured and are dropped otherwise.
    pub fn encode(&self, s: &str, add_bos: bool, add_eos: bool) -> Vec<u32> {
        let mut tokens = Vec::with_capacity(s.chars().count() + 2);
        if add_bos {
            tokens.push(self.bos);
        }
        tokens.extend(
            s.chars()
                .filter_map(|ch| self.ch2id.get(&ch).copied().or(self.unk)),
        );
        if add_eos {
            tokens.push(self.eos);
        }
        tokens
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        let mut text = String::new();
        for &id in ids {
            if id == self.pad || id == self.bos {
                continue;
            }
            if id == self.eos {
                break;
            }
            if Some(id) == self.unk {
                text.push('?');
            } else if let Some(&ch) = self.id2ch.get(id as usize) {
                text.push(ch);
            }
        }
        text
    }

    pub fn len(&self) -> usize {
        self.id2ch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2ch.is_empty()
    }

    pub fn contains(&self, ch: char) -> bool {
        self.ch2id.contains_key(&ch)
    }

    pub fn bos(&self) -> u32 {
        self.bos
    }

    pub fn unk(&self) -> Option<u32> {
        self.unk
    }
}

#[derive(Serialize, Deserialize)]
struct CharVocabRecord {
    chars: Vec<char>,
    unk: Option<u32>,
}

impl super::Tokenizer for CharVocab {
    fn encode(&self, s: &str, add_bos: bool, add_eos: bool) -> Vec<u32> {
        Self::encode(self, s, add_bos, add_eos)
    }

    fn decode(&self, ids: &[u32]) -> String {
        Self::decode(self, ids)
    }

    fn token_text(&self, id: u32) -> Option<String> {
        if super::Tokenizer::is_special(self, id) {
            return None;
        }
        self.id2ch.get(id as usize).map(|ch| ch.to_string())
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn bos_id(&self) -> Option<u32> {
        Some(self.bos)
    }

    fn eos_id(&self) -> Option<u32> {
        Some(self.eos)
    }

    fn pad_id(&self) -> Option<u32> {
        Some(self.pad)
    }

    fn unk_id(&self) -> Option<u32> {
        self.unk
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;
    use tempfile::tempdir;

    #[test]
    fn fit_keeps_first_seen_order() {
        let vocab = CharVocab::fit(["你好", "你好再见"].into_iter(), true).expect("fit");
        // four specials, then 你 好 再 见
        assert_eq!(vocab.len(), 8);
        let ids = vocab.encode("你好再见", false, false);
        assert_eq!(ids, vec![4, 5, 6, 7]);
        assert_eq!(vocab.decode(&ids), "你好再见");
    }

    #[test]
    fn unknown_characters_follow_unk_policy() {
        let with_unk = CharVocab::fit(["ab"].into_iter(), true).expect("fit");
        let tokens = with_unk.encode("ac", false, false);
        assert_eq!(tokens, vec![with_unk.ch2id[&'a'], with_unk.unk().expect("unk")]);

        let strict = CharVocab::fit(["ab"].into_iter(), false).expect("fit");
        assert_eq!(strict.encode("ac", false, false).len(), 1);
    }

    #[test]
    fn extending_keeps_existing_ids() {
        let vocab = CharVocab::fit(["ab"].into_iter(), true).expect("fit");
        assert_eq!(vocab.missing_chars(["abc", "cd"].into_iter()), vec!['c', 'd']);

        let grown = vocab.extended(["abc", "cd"].into_iter()).expect("extend");
        assert_eq!(grown.len(), vocab.len() + 2);
        assert_eq!(grown.encode("ab", false, false), vocab.encode("ab", false, false));
        assert!(grown.missing_chars(["abcd"].into_iter()).is_empty());
        assert_eq!(grown.unk(), vocab.unk());
    }

    #[test]
    fn special_tokens_have_no_surface_text() {
        let vocab = CharVocab::fit(["a"].into_iter(), true).expect("fit");
        assert_eq!(vocab.token_text(vocab.bos()), None);
        assert_eq!(vocab.token_text(vocab.ch2id[&'a']).as_deref(), Some("a"));
    }

    #[test]
    fn save_and_load_preserves_vocab() {
        let vocab = CharVocab::fit(["意识和熵"].into_iter(), true).expect("fit");
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("vocab.json");
        vocab.save(&path).expect("save vocab");
        let loaded = CharVocab::load(&path).expect("load vocab");
        assert_eq!(vocab, loaded);
    }
}
