use std::any::Any;

const BYTE_VOCAB: u32 = 256;

/// Raw UTF-8 byte tokenizer. Needs no fitted vocabulary; optional BOS/EOS/PAD
/// ids are appended after the 256 byte values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByteTokenizer {
    add_special_tokens: bool,
}

impl ByteTokenizer {
    pub fn new(add_special_tokens: bool) -> Self {
        Self { add_special_tokens }
    }

    fn special(&self, offset: u32) -> Option<u32> {
        self.add_special_tokens.then_some(BYTE_VOCAB + offset)
    }
}

impl super::Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<u32> {
        let mut ids = Vec::with_capacity(text.len() + 2);
        if add_bos && let Some(bos) = self.bos_id() {
            ids.push(bos);
        }
        ids.extend(text.bytes().map(u32::from));
        if add_eos && let Some(eos) = self.eos_id() {
            ids.push(eos);
        }
        ids
    }

    fn decode(&self, ids: &[u32]) -> String {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            if Some(id) == self.eos_id() {
                break;
            }
            if let Ok(byte) = u8::try_from(id) {
                bytes.push(byte);
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Only ASCII bytes are text on their own.
    fn token_text(&self, id: u32) -> Option<String> {
        let byte = u8::try_from(id).ok()?;
        byte.is_ascii().then(|| char::from(byte).to_string())
    }

    /// Bytes are regrouped into characters so multibyte scripts yield one term
    /// per character; invalid sequences are dropped.
    fn terms(&self, ids: &[u32]) -> Vec<String> {
        let bytes: Vec<u8> = ids.iter().filter_map(|&id| u8::try_from(id).ok()).collect();
        String::from_utf8_lossy(&bytes)
            .chars()
            .filter(|&ch| ch != char::REPLACEMENT_CHARACTER)
            .map(String::from)
            .collect()
    }

    fn len(&self) -> usize {
        if self.add_special_tokens {
            BYTE_VOCAB as usize + 3
        } else {
            BYTE_VOCAB as usize
        }
    }

    fn bos_id(&self) -> Option<u32> {
        self.special(0)
    }

    fn eos_id(&self) -> Option<u32> {
        self.special(1)
    }

    fn pad_id(&self) -> Option<u32> {
        self.special(2)
    }

    fn unk_id(&self) -> Option<u32> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;

    #[test]
    fn bytes_round_trip_through_specials() {
        let tokenizer = ByteTokenizer::new(true);
        let ids = tokenizer.encode("héllo", true, true);
        assert_eq!(ids.first().copied(), tokenizer.bos_id());
        assert_eq!(ids.last().copied(), tokenizer.eos_id());
        assert_eq!(tokenizer.decode(&ids[1..]), "héllo");
        assert_eq!(tokenizer.len(), 259);
    }

    #[test]
    fn multibyte_characters_become_single_terms() {
        let tokenizer = ByteTokenizer::new(true);
        let ids = tokenizer.encode("a你好", true, true);
        assert_eq!(tokenizer.terms(&ids), vec!["a", "你", "好"]);
        assert_eq!(tokenizer.token_text(ids[2]), None);
        assert_eq!(tokenizer.token_text(u32::from(b'a')).as_deref(), Some("a"));

        // a truncated sequence carries no character
        assert_eq!(tokenizer.terms(&ids[1..3]), vec!["a"]);
    }

    #[test]
    fn without_specials_bos_is_ignored() {
        let tokenizer = ByteTokenizer::new(false);
        assert_eq!(tokenizer.encode("ab", true, true), vec![97, 98]);
        assert!(!tokenizer.is_special(97));
    }
}
