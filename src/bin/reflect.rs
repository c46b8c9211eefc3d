use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use entropy_reflection::{
    ArtifactStore, BdhProbe, ProbeConfig, ReflectionPipeline, decide_from_artifacts,
    load_probe_config, report,
};

type Backend = NdArray<f32>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Trace dialogue entropy and decide whether to reflect")]
struct Cli {
    /// Additional configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    config: Vec<PathBuf>,
    /// Override the artifact directory.
    #[arg(long, value_name = "DIR", global = true)]
    artifacts: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every turn of a dialogue and write all artifacts.
    Trace {
        /// Dialogue file, one utterance per non-empty line.
        #[arg(long, value_name = "FILE")]
        dialogue: PathBuf,
    },
    /// Re-run the trigger on the entropy, attention and keyword artifacts.
    Decide,
    /// Render the Markdown report from the trace and decision artifacts.
    Report,
    /// Fit the character vocabulary on a dialogue and save it.
    BuildVocab {
        #[arg(long, value_name = "FILE")]
        dialogue: PathBuf,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config_paths = Vec::new();
    let base = PathBuf::from("config/base.toml");
    if base.is_file() {
        config_paths.push(base);
    }
    config_paths.extend(cli.config.clone());
    let mut config = load_probe_config(&config_paths).context("failed to load configuration")?;
    if let Some(dir) = &cli.artifacts {
        config.artifacts.dir = dir.clone();
    }

    match &cli.command {
        Command::Trace { dialogue } => trace(&config, dialogue),
        Command::Decide => decide(&config),
        Command::Report => render_report(&config),
        Command::BuildVocab { dialogue } => build_vocab(&config, dialogue),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_dialogue(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read dialogue {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn trace(config: &ProbeConfig, dialogue_path: &Path) -> Result<()> {
    let dialogue = read_dialogue(dialogue_path)?;
    if dialogue.is_empty() {
        warn!("dialogue {} has no utterances", dialogue_path.display());
    }
    info!("Loaded {} turns from {}", dialogue.len(), dialogue_path.display());

    let tokenizer = config
        .tokenizer
        .load_or_fit(&config.artifacts.dir, dialogue.iter().map(String::as_str))?;
    let probe = BdhProbe::<Backend>::from_config(&config.model, tokenizer, NdArrayDevice::Cpu)?
        .with_window(config.tracer.window.window());

    let output = ReflectionPipeline::from_config(config).run(&probe, &dialogue)?;
    output.write_artifacts(&config.artifacts)?;

    println!("{}", serde_json::to_string_pretty(&output.decision)?);
    Ok(())
}

fn decide(config: &ProbeConfig) -> Result<()> {
    let decision = decide_from_artifacts(config)?;
    ArtifactStore::new(&config.artifacts).write_decision(&decision)?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn render_report(config: &ProbeConfig) -> Result<()> {
    let store = ArtifactStore::new(&config.artifacts);
    let trace = store.read_trace()?;
    let decision = store.read_decision()?;
    let markdown = report::render(&trace, &decision);
    store.write_report(&markdown)?;
    print!("{markdown}");
    Ok(())
}

fn build_vocab(config: &ProbeConfig, dialogue_path: &Path) -> Result<()> {
    let dialogue = read_dialogue(dialogue_path)?;
    let tokenizer = config
        .tokenizer
        .fit(dialogue.iter().map(String::as_str))?;
    match config.tokenizer.storage_path(&config.artifacts.dir) {
        Some(path) => {
            config.tokenizer.save(tokenizer.as_ref(), &path)?;
            info!(
                "Saved {} tokenizer with {} tokens to {}",
                config.tokenizer.kind_name(),
                tokenizer.len(),
                path.display()
            );
        }
        None => info!(
            "{} tokenizer needs no vocabulary file",
            config.tokenizer.kind_name()
        ),
    }
    Ok(())
}
