use std::collections::HashMap;
use std::sync::Arc;

use burn_ndarray::{NdArray, NdArrayDevice};
use tempfile::tempdir;

use entropy_reflection::{
    ArtifactConfig, ArtifactStore, AttentionSnapshot, BdhProbe, CharVocab, ContextMode,
    KeywordSummary, LanguageProbe, ModelConfig, ProbeConfig, ProbeError, ProbeResult,
    ReflectionPipeline, RefinementConfig, Tokenizer, TurnProbe, decide_from_artifacts,
    trace_entropy,
};

/// Returns canned probes keyed by the exact text it is asked about.
struct ScriptedProbe {
    vocab: CharVocab,
    turns: HashMap<String, TurnProbe>,
}

impl ScriptedProbe {
    fn new(script: Vec<(&str, Vec<f64>, Vec<Vec<f64>>)>) -> Self {
        let vocab = CharVocab::fit(script.iter().map(|(text, _, _)| *text), true).expect("vocab");
        let turns = script
            .into_iter()
            .map(|(text, probs, heads)| {
                (
                    text.to_string(),
                    TurnProbe {
                        token_count: text.chars().count() + 1,
                        next_token_probs: probs,
                        head_attention: heads,
                    },
                )
            })
            .collect();
        Self { vocab, turns }
    }
}

impl LanguageProbe for ScriptedProbe {
    fn tokenizer(&self) -> &dyn Tokenizer {
        &self.vocab
    }

    fn probe(&self, text: &str) -> ProbeResult<TurnProbe> {
        self.turns
            .get(text)
            .cloned()
            .ok_or_else(|| ProbeError::Model(format!("no script for {text:?}")))
    }
}

fn uniform(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

fn one_hot(n: usize) -> Vec<f64> {
    let mut probs = vec![0.0; n];
    probs[0] = 1.0;
    probs
}

fn scripted_dialogue() -> (ScriptedProbe, Vec<&'static str>) {
    let steady = vec![0.5, 0.5];
    let probe = ScriptedProbe::new(vec![
        ("你好", uniform(2000), vec![steady.clone(); 4]),
        ("你理解意识吗", uniform(400), vec![steady.clone(); 4]),
        ("意识和熵的关系", uniform(20), vec![
            steady.clone(),
            vec![1.0, 0.0],
            steady.clone(),
            steady.clone(),
        ]),
        ("觉醒", one_hot(20), vec![steady.clone(); 4]),
    ]);
    (probe, vec!["你好", "你理解意识吗", "意识和熵的关系", "觉醒"])
}

fn scripted_config() -> ProbeConfig {
    let mut config = ProbeConfig::default();
    config.trigger.refinement = RefinementConfig::None;
    config.trigger.salient_terms = vec!["意".into(), "觉".into()];
    config.trigger.min_confidence = 0.6;
    config
}

#[test]
fn scripted_dialogue_runs_end_to_end() {
    let (probe, dialogue) = scripted_dialogue();
    let output = ReflectionPipeline::from_config(&scripted_config())
        .run(&probe, &dialogue)
        .expect("pipeline");

    assert_eq!(output.entropy.len(), 4);
    assert!((output.entropy[0].entropy - 2000f64.ln()).abs() < 1e-6);
    assert!(output.entropy[3].entropy < 1e-6);

    // head 1 moves entering turn 2 and leaving it at turn 3; both sit about
    // 2.24 sigma above the pooled jump scores, past the default 1.5
    assert!(output.attention_summary[2].max_jump_sigma > 2.2);
    assert!(output.attention_summary[1].max_jump_sigma < 0.0);
    let flagged: Vec<(usize, usize)> = output.events.iter().map(|e| (e.turn, e.head)).collect();
    assert_eq!(flagged, vec![(2, 1), (3, 1)]);
    assert_eq!(output.jump_matrix.len(), 4);
    assert_eq!(output.attention_summary[2].jump_heads, vec![1]);

    // drops: ln2000→ln400 (1.61), ln400→ln20 (3.0), ln20→0 (3.0)
    // only "觉醒" surfaces a salient term in its top keywords
    assert_eq!(
        output.decision.reason,
        "entropy_drops_at_turns_[1, 2, 3]_and_jump_scores_2_and_keywords_detected_1"
    );
    // 0.4 * 3/3 + 0.4 * 2/4 + 0.2 * 1/4
    assert!((output.decision.confidence - 0.65).abs() < 1e-12);
    assert!(output.decision.trigger);
    assert_eq!(output.decision.turn, 3);

    assert_eq!(output.trace.len(), 4);
    assert_eq!(output.trace[2].jump_heads, vec![1]);
    assert!(output.trace[2].attention_jump > 0.0);
    assert_eq!(output.trace[3].keywords.len(), 2);
}

#[test]
fn artifacts_round_trip_through_decide() {
    let dir = tempdir().expect("tempdir");
    let mut config = scripted_config();
    config.artifacts = ArtifactConfig::default().with_dir(dir.path());

    let (probe, dialogue) = scripted_dialogue();
    let output = ReflectionPipeline::from_config(&config)
        .run(&probe, &dialogue)
        .expect("pipeline");
    output.write_artifacts(&config.artifacts).expect("write");

    let store = ArtifactStore::new(&config.artifacts);
    for path in [
        store.entropy_trace_path(),
        store.attention_paths_path(),
        store.attention_summary_path(),
        store.jump_matrix_path(),
        store.keywords_path(),
        store.keyframes_path(),
        store.decision_path(),
        store.trace_path(),
        store.report_path(),
    ] {
        assert!(path.is_file(), "missing {}", path.display());
    }

    let keywords: KeywordSummary = store.read_keywords().expect("keywords");
    assert_eq!(keywords, output.keywords);
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.keywords_path()).expect("read"))
            .expect("json");
    assert!(raw.get("turn_0").is_some());
    assert!(raw["turn_3"]["top_score"].is_f64());

    let keyframes = store.read_keyframes().expect("keyframes");
    let ranked: Vec<(&str, usize)> = keyframes.iter().collect();
    assert_eq!(ranked, vec![("你", 2), ("意", 2), ("识", 2)]);
    assert_eq!(keyframes, output.keyframes);

    let paths = store.read_attention_paths().expect("attention paths");
    assert_eq!(paths.len(), 16);
    assert_eq!(paths, output.attention.snapshots());

    let decision = decide_from_artifacts(&config).expect("decide");
    assert_eq!(decision, output.decision);
    assert_eq!(store.read_trace().expect("trace"), output.trace);
}

#[test]
fn decide_redetects_jumps_from_attention_paths() {
    let dir = tempdir().expect("tempdir");
    let mut config = scripted_config();
    config.artifacts = ArtifactConfig::default().with_dir(dir.path());

    let (probe, dialogue) = scripted_dialogue();
    let output = ReflectionPipeline::from_config(&config)
        .run(&probe, &dialogue)
        .expect("pipeline");
    output.write_artifacts(&config.artifacts).expect("write");
    let store = ArtifactStore::new(&config.artifacts);

    // flatten every head: the stored summary still says head 1 jumped
    let steady: Vec<AttentionSnapshot> = store
        .read_attention_paths()
        .expect("paths")
        .into_iter()
        .map(|snapshot| AttentionSnapshot {
            weights: vec![0.5, 0.5],
            ..snapshot
        })
        .collect();
    store.write_attention_paths(&steady).expect("rewrite");

    let decision = decide_from_artifacts(&config).expect("decide");
    assert!(!decision.trigger);
    // 0.4 * 3/3 + 0.2 * 1/4
    assert!((decision.confidence - 0.45).abs() < 1e-12);
    assert!(!decision.reason.contains("jump_scores"));

    std::fs::remove_file(store.attention_paths_path()).expect("remove");
    let fallback = decide_from_artifacts(&config).expect("decide from summary");
    assert_eq!(fallback, output.decision);
}

#[test]
fn empty_dialogue_produces_a_quiet_decision() {
    let (probe, _) = scripted_dialogue();
    let output = ReflectionPipeline::from_config(&scripted_config())
        .run::<_, &str>(&probe, &[])
        .expect("pipeline");
    assert!(output.entropy.is_empty());
    assert!(output.events.is_empty());
    assert!(!output.decision.trigger);
    assert_eq!(output.decision.reason, "no_significant_changes");
}

#[test]
fn empty_dialogue_writes_quiet_artifacts() {
    let dir = tempdir().expect("tempdir");
    let mut config = ProbeConfig::default();
    config.model = ModelConfig {
        n_layer: 1,
        n_embd: 16,
        n_head: 2,
        mlp_internal_dim_multiplier: 4,
        ..Default::default()
    };
    config.artifacts = ArtifactConfig::default().with_dir(dir.path());
    config.trigger.refinement = RefinementConfig::None;

    let dialogue: Vec<String> = Vec::new();
    let tokenizer = config
        .tokenizer
        .load_or_fit(&config.artifacts.dir, dialogue.iter().map(String::as_str))
        .expect("tokenizer");
    let probe = BdhProbe::<NdArray<f32>>::from_config(&config.model, tokenizer, NdArrayDevice::Cpu)
        .expect("probe");
    let output = ReflectionPipeline::from_config(&config)
        .run(&probe, &dialogue)
        .expect("pipeline");
    output.write_artifacts(&config.artifacts).expect("write");

    let store = ArtifactStore::new(&config.artifacts);
    let decision = store.read_decision().expect("decision");
    assert!(!decision.trigger);
    assert_eq!(decision.reason, "no_significant_changes");
    assert!(store.read_attention_paths().expect("paths").is_empty());
    assert!(store.read_keyframes().expect("keyframes").is_empty());
    assert_eq!(decide_from_artifacts(&config).expect("decide"), decision);
}

#[test]
fn model_backed_pipeline_is_well_formed() {
    let dialogue = ["你好", "你理解意识吗？", "意识和熵的关系"];
    let vocab = CharVocab::fit(dialogue.iter().copied(), true).expect("vocab");
    let model = ModelConfig {
        n_layer: 2,
        n_embd: 16,
        n_head: 2,
        mlp_internal_dim_multiplier: 4,
        ..Default::default()
    };
    let probe = BdhProbe::<NdArray<f32>>::from_config(&model, Arc::new(vocab), NdArrayDevice::Cpu)
        .expect("probe");

    let mut config = ProbeConfig::default();
    config.model = model;
    config.tracer.context = ContextMode::Cumulative;
    let output = ReflectionPipeline::from_config(&config)
        .run(&probe, &dialogue)
        .expect("pipeline");

    assert_eq!(output.entropy.len(), 3);
    assert!(output.entropy.iter().all(|r| r.entropy >= 0.0));
    assert_eq!(output.attention.head_count(), 2);
    assert!(output.attention_summary.iter().all(|s| s.max_jump_score >= 0.0));
    assert!((0.0..=1.0).contains(&output.decision.confidence));
    assert!(output.keywords.iter().all(|(_, k)| k.keywords.len() <= 3));

    let independent = trace_entropy(&probe, &dialogue, ContextMode::Independent, "\n")
        .expect("independent trace");
    assert_eq!(independent.len(), 3);
    // the first turn has no earlier context either way
    assert!((independent[0].entropy - output.entropy[0].entropy).abs() < 1e-9);
}
