//! TF-IDF keyword salience over the dialogue's own turns.
//!
//! Terms are the model tokenizer's surface tokens, so keywords always live in
//! the vocabulary the entropy and attention stages saw.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::KeywordConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnKeywords {
    pub keywords: Vec<String>,
    pub top_score: f64,
}

/// `turn_<i>` → keywords, in turn order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordSummary {
    entries: IndexMap<String, TurnKeywords>,
}

impl KeywordSummary {
    pub fn from_turns(turns: Vec<TurnKeywords>) -> Self {
        Self {
            entries: turns
                .into_iter()
                .enumerate()
                .map(|(turn, keywords)| (turn_key(turn), keywords))
                .collect(),
        }
    }

    pub fn get(&self, turn: usize) -> Option<&TurnKeywords> {
        self.entries.get(&turn_key(turn))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TurnKeywords)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Fails unless the keys are exactly `turn_0..turn_<n-1>`.
    pub fn ensure_turns(&self, turn_count: usize) -> ProbeResult<()> {
        if self.entries.len() != turn_count {
            return Err(ProbeError::Validation(format!(
                "keyword summary covers {} turns, expected {turn_count}",
                self.entries.len()
            )));
        }
        if let Some(missing) = (0..turn_count).find(|turn| self.get(*turn).is_none()) {
            return Err(ProbeError::Validation(format!(
                "keyword summary has no entry for {}",
                turn_key(missing)
            )));
        }
        Ok(())
    }
}

/// Most frequent tokens across the whole dialogue, term → count, most
/// frequent first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenKeyframes {
    counts: IndexMap<String, usize>,
}

impl TokenKeyframes {
    /// Keep the `top_k` largest counts; ties stay in first-occurrence order.
    pub fn from_terms<I, T>(terms: I, top_k: usize) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for term in terms {
            *counts.entry(term.into()).or_insert(0) += 1;
        }
        counts.sort_by(|_, a, _, b| b.cmp(a));
        counts.truncate(top_k);
        Self { counts }
    }

    pub fn get(&self, term: &str) -> Option<usize> {
        self.counts.get(term).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(term, count)| (term.as_str(), *count))
    }
}

pub fn turn_key(turn: usize) -> String {
    format!("turn_{turn}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordExtractor {
    pub top_k: usize,
    pub lowercase: bool,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::from(&KeywordConfig::default())
    }
}

impl From<&KeywordConfig> for KeywordExtractor {
    fn from(config: &KeywordConfig) -> Self {
        Self {
            top_k: config.top_k,
            lowercase: config.lowercase,
        }
    }
}

impl KeywordExtractor {
    /// Surface terms of `text`, specials and whitespace dropped.
    pub fn terms(&self, tokenizer: &dyn Tokenizer, text: &str) -> Vec<String> {
        tokenizer
            .terms(&tokenizer.encode(text, false, false))
            .into_iter()
            .filter(|term| !term.trim().is_empty())
            .map(|term| {
                if self.lowercase {
                    term.to_lowercase()
                } else {
                    term
                }
            })
            .collect()
    }

    pub fn extract<S: AsRef<str>>(
        &self,
        tokenizer: &dyn Tokenizer,
        dialogue: &[S],
    ) -> KeywordSummary {
        let documents: Vec<Vec<String>> = dialogue
            .iter()
            .map(|utterance| self.terms(tokenizer, utterance.as_ref()))
            .collect();
        KeywordSummary::from_turns(self.score_documents(&documents))
    }

    /// Token counts pooled over every turn, truncated to `top_k`.
    pub fn keyframes<S: AsRef<str>>(
        &self,
        tokenizer: &dyn Tokenizer,
        dialogue: &[S],
    ) -> TokenKeyframes {
        TokenKeyframes::from_terms(
            dialogue
                .iter()
                .flat_map(|utterance| self.terms(tokenizer, utterance.as_ref())),
            self.top_k,
        )
    }

    /// Raw term count times smoothed idf `ln((1 + n) / (1 + df)) + 1`, each
    /// turn's vector L2-normalised so scores stay in `[0, 1]`.
    pub fn score_documents(&self, documents: &[Vec<String>]) -> Vec<TurnKeywords> {
        let counts: Vec<IndexMap<&str, usize>> = documents
            .iter()
            .map(|terms| {
                let mut counts = IndexMap::new();
                for term in terms {
                    *counts.entry(term.as_str()).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        let mut document_frequency: IndexMap<&str, usize> = IndexMap::new();
        for doc in &counts {
            for term in doc.keys() {
                *document_frequency.entry(*term).or_insert(0) += 1;
            }
        }

        let n = documents.len() as f64;
        counts
            .iter()
            .map(|doc| {
                let mut scored: Vec<(&str, f64)> = doc
                    .iter()
                    .map(|(term, count)| {
                        let df = document_frequency.get(term).copied().unwrap_or(0) as f64;
                        let idf = ((1.0 + n) / (1.0 + df)).ln() + 1.0;
                        (*term, *count as f64 * idf)
                    })
                    .collect();

                let norm = scored.iter().map(|(_, s)| s * s).sum::<f64>().sqrt();
                if norm > 0.0 {
                    scored.iter_mut().for_each(|(_, s)| *s /= norm);
                }
                // stable: equal scores keep first-occurrence order
                scored.sort_by(|a, b| b.1.total_cmp(&a.1));
                scored.truncate(self.top_k);

                TurnKeywords {
                    top_score: scored.first().map(|(_, s)| s.clamp(0.0, 1.0)).unwrap_or(0.0),
                    keywords: scored.into_iter().map(|(term, _)| term.to_string()).collect(),
                }
            })
            .collect()
    }
}
