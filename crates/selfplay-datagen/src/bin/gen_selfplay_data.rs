//! チェスエンジン同士の自己対局で学習データを生成する。
//!
//! 例:
//!
//! - Stockfish を参照側 (engine B, Skill Level 7) にして 200 局:
//!   `cargo run -p selfplay-datagen --bin gen_selfplay_data -- --engine-a ./build/chess_engine --engine-b stockfish --games 200`
//!
//! - 設定ファイルを使い、棋譜ログも残す:
//!   `cargo run -p selfplay-datagen --bin gen_selfplay_data -- --config selfplay.toml --transcript`
//!
//! データセットは `<fen> | <score> | <label>` 形式で追記される。`--transcript` に
//! パスを付けなければ `runs/selfplay/<timestamp>-selfplay.jsonl` に書き出す。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;

use selfplay_datagen::selfplay::{
    EngineSlot, Orchestrator, ProcessEngineFactory, RunSummary, SelfplayConfig,
    default_transcript_path,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Chess engine self-play harness that writes outcome-labeled training positions"
)]
struct Cli {
    /// TOML config file (command-line flags override its values)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine A executable (the side being trained)
    #[arg(long)]
    engine_a: Option<PathBuf>,

    /// Engine B executable (reference side, strength-limited)
    #[arg(long)]
    engine_b: Option<PathBuf>,

    /// Extra command-line argument for engine A (repeatable)
    #[arg(long = "engine-a-arg", allow_hyphen_values = true)]
    engine_a_args: Vec<String>,

    /// Extra command-line argument for engine B (repeatable)
    #[arg(long = "engine-b-arg", allow_hyphen_values = true)]
    engine_b_args: Vec<String>,

    /// Display name for engine A
    #[arg(long)]
    label_a: Option<String>,

    /// Display name for engine B
    #[arg(long)]
    label_b: Option<String>,

    /// UCI option for engine A as Name=Value (repeatable)
    #[arg(long = "option-a")]
    options_a: Vec<String>,

    /// UCI option for engine B as Name=Value (repeatable)
    #[arg(long = "option-b")]
    options_b: Vec<String>,

    /// Number of games to play
    #[arg(long)]
    games: Option<u32>,

    /// Think time per move in milliseconds
    #[arg(long)]
    move_time_ms: Option<u64>,

    /// Number of diversified opening plies (not recorded)
    #[arg(long)]
    opening_plies: Option<u32>,

    /// MultiPV width requested for opening analysis
    #[arg(long)]
    analysis_breadth: Option<u32>,

    /// Analysis time per opening ply in milliseconds
    #[arg(long)]
    opening_time_ms: Option<u64>,

    /// Engine that guides the opening (a or b)
    #[arg(long, value_parser = ["a", "b"])]
    opening_guide: Option<String>,

    /// UCI "Skill Level" for engine B
    #[arg(long, conflicts_with = "no_skill_level")]
    skill_level: Option<u8>,

    /// Do not limit engine B's strength
    #[arg(long, default_value_t = false)]
    no_skill_level: bool,

    /// Maximum recorded positions per game before declaring a draw
    #[arg(long)]
    max_plies: Option<u32>,

    /// Grace period before a silent engine is stopped / declared timed out
    #[arg(long)]
    timeout_grace_ms: Option<u64>,

    /// Training-data file (appended to)
    #[arg(long, short = 'o')]
    dataset: Option<PathBuf>,

    /// Write a JSONL transcript (defaults to runs/selfplay/<timestamp>-selfplay.jsonl)
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    transcript: Option<String>,

    /// Start positions file (one FEN per line, .gz accepted)
    #[arg(long)]
    startpos_file: Option<PathBuf>,

    /// Base RNG seed (game i uses seed + i)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of parallel workers, each with its own engine pair
    #[arg(long)]
    concurrency: Option<usize>,

    /// Record the moving engine's score (white perspective) instead of 0
    #[arg(long, default_value_t = false)]
    record_engine_score: bool,
}

fn build_config(cli: &Cli) -> Result<SelfplayConfig> {
    let mut config = match &cli.config {
        Some(path) => SelfplayConfig::load(path)?,
        None => SelfplayConfig::default(),
    };

    for (slot, path, args, label, options) in [
        (EngineSlot::A, &cli.engine_a, &cli.engine_a_args, &cli.label_a, &cli.options_a),
        (EngineSlot::B, &cli.engine_b, &cli.engine_b_args, &cli.label_b, &cli.options_b),
    ] {
        let section = config.section_mut(slot);
        if let Some(path) = path {
            section.path = path.clone();
        }
        if !args.is_empty() {
            section.args = args.clone();
        }
        if let Some(label) = label {
            section.label = Some(label.clone());
        }
        config.push_cli_options(slot, options)?;
    }

    if let Some(v) = cli.games {
        config.games = v;
    }
    if let Some(v) = cli.move_time_ms {
        config.move_time_ms = v;
    }
    if let Some(v) = cli.opening_plies {
        config.opening_plies = v;
    }
    if let Some(v) = cli.analysis_breadth {
        config.analysis_breadth = v;
    }
    if let Some(v) = cli.opening_time_ms {
        config.opening_time_ms = v;
    }
    if let Some(v) = cli.opening_guide.as_deref() {
        config.opening_guide = if v == "a" { EngineSlot::A } else { EngineSlot::B };
    }
    if cli.no_skill_level {
        config.skill_level = None;
    } else if let Some(v) = cli.skill_level {
        config.skill_level = Some(v);
    }
    if let Some(v) = cli.max_plies {
        config.max_plies = v;
    }
    if let Some(v) = cli.timeout_grace_ms {
        config.timeout_grace_ms = v;
    }
    if let Some(v) = &cli.dataset {
        config.dataset = v.clone();
    }
    match cli.transcript.as_deref() {
        Some("") => config.transcript = Some(default_transcript_path(&Local::now())),
        Some(path) => config.transcript = Some(PathBuf::from(path)),
        None => {}
    }
    if let Some(v) = &cli.startpos_file {
        config.startpos_file = Some(v.clone());
    }
    if let Some(v) = cli.seed {
        config.seed = Some(v);
    }
    if let Some(v) = cli.concurrency {
        config.concurrency = v;
    }
    if cli.record_engine_score {
        config.record_engine_score = true;
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(summary: &RunSummary, config: &SelfplayConfig) {
    println!();
    println!("=== Self-play Complete ===");
    if summary.interrupted {
        println!("(interrupted)");
    }
    println!(
        "Games: {} (1-0: {}, 0-1: {}, draw: {}, aborted: {})",
        summary.games_played, summary.white_wins, summary.black_wins, summary.draws, summary.aborted
    );
    println!("Wins: engine A {}, engine B {}", summary.engine_a_wins, summary.engine_b_wins);
    println!("Records: {} -> {}", summary.records_written, config.dataset.display());
    if let Some(path) = &config.transcript {
        println!("Transcript: {}", path.display());
    }
    println!("Elapsed: {:.1}s", summary.elapsed_ms as f64 / 1000.0);
    println!("==========================");
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    let factory = ProcessEngineFactory::new(
        config.engine_config(EngineSlot::A)?,
        config.engine_config(EngineSlot::B)?,
        config.timeout_grace(),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    // Ctrl-C ハンドラ
    {
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, finishing the current move and shutting down...");
            shutdown_clone.store(true, Ordering::SeqCst);
        })
        .ok();
    }

    let orchestrator = Orchestrator::new(config, Arc::new(factory), shutdown);
    let summary = orchestrator.run().context("self-play run failed")?;
    print_summary(&summary, orchestrator.config());
    Ok(())
}
