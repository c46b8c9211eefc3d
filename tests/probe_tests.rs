use std::sync::Arc;

use burn_ndarray::{NdArray, NdArrayDevice};

use entropy_reflection::tokenizer::byte::ByteTokenizer;
use entropy_reflection::{
    BdhProbe, CharVocab, LanguageProbe, ModelConfig, ProbeError, SharedTokenizer, token_entropy,
};

type Backend = NdArray<f32>;

fn small_model() -> ModelConfig {
    ModelConfig {
        n_layer: 2,
        n_embd: 16,
        n_head: 2,
        mlp_internal_dim_multiplier: 4,
        ..Default::default()
    }
}

fn char_probe(corpus: &[&str]) -> BdhProbe<Backend> {
    let vocab = CharVocab::fit(corpus.iter().copied(), true).expect("vocab");
    let tokenizer: SharedTokenizer = Arc::new(vocab);
    BdhProbe::<Backend>::from_config(&small_model(), tokenizer, NdArrayDevice::Cpu).expect("probe")
}

#[test]
fn probe_returns_distribution_and_attention_per_head() {
    let probe = char_probe(&["你好", "你理解意识吗？"]);
    let result = probe.probe("你理解意识吗？").expect("probe");

    // BOS plus seven characters
    assert_eq!(result.token_count, 8);
    let total: f64 = result.next_token_probs.iter().sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert_eq!(result.next_token_probs.len(), probe.tokenizer().len());

    let entropy = token_entropy(&result.next_token_probs);
    assert!(entropy >= 0.0);
    assert!(entropy <= (result.next_token_probs.len() as f64).ln() + 1e-9);

    assert_eq!(result.head_attention.len(), 2);
    for row in &result.head_attention {
        assert_eq!(row.len(), 7);
        let sum: f64 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(row.iter().all(|w| *w >= 0.0));
    }
}

#[test]
fn sliding_window_limits_the_context() {
    let probe = char_probe(&["abcdefgh"]).with_window(Some(3));
    let result = probe.probe("abcdefgh").expect("probe");
    assert_eq!(result.token_count, 3);
    assert!(result.head_attention.iter().all(|row| row.len() == 2));
}

#[test]
fn empty_utterance_is_scored_from_bos_alone() {
    let probe = char_probe(&["ab"]);
    let result = probe.probe("").expect("probe");
    assert_eq!(result.token_count, 1);
    assert!(result.head_attention.iter().all(|row| row == &vec![1.0]));
}

#[test]
fn utterance_without_tokens_is_a_shape_error() {
    let tokenizer: SharedTokenizer = Arc::new(ByteTokenizer::new(false));
    let probe = BdhProbe::<Backend>::from_config(&small_model(), tokenizer, NdArrayDevice::Cpu)
        .expect("probe");
    let err = probe.probe("").expect_err("no tokens");
    assert!(matches!(err, ProbeError::InputShape(_)));
    assert!(err.is_bad_input());
}

#[test]
fn out_of_range_attention_layer_is_rejected() {
    let vocab = CharVocab::fit(["a"].into_iter(), true).expect("vocab");
    let config = ModelConfig {
        attention_layer: 5,
        ..small_model()
    };
    let result = BdhProbe::<Backend>::from_config(&config, Arc::new(vocab), NdArrayDevice::Cpu);
    assert!(matches!(result, Err(ProbeError::Config(_))));
}
