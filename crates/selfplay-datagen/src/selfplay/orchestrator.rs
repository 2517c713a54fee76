//! 自己対局の実行管理
//!
//! crossbeam-channel のワーカーモデルで対局を進める。各ワーカーは独立した
//! エンジンの組を所有し、データセットと棋譜ログへの書き込みはメインスレッドだけが
//! 行う。どの経路で終了しても、戻る前にすべてのエンジンを終了させる。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use chrono::Local;
use crossbeam_channel as chan;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::Serialize;

use super::config::SelfplayConfig;
use super::engine::EngineFactory;
use super::error::{EngineError, SelfplayError, SelfplayResult};
use super::game::{EnginePair, GameConfig, GameReport, GameRunner, RoundAssignment};
use super::opening::OpeningSampler;
use super::position::{GameSession, load_start_positions};
use super::sink::{DatasetSink, TranscriptWriter};
use super::types::{EngineSlot, GameOutcome, duration_to_millis};

/// 実行全体の集計
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub games_played: u32,
    pub white_wins: u32,
    pub black_wins: u32,
    pub draws: u32,
    pub aborted: u32,
    pub engine_a_wins: u32,
    pub engine_b_wins: u32,
    pub records_written: u64,
    pub elapsed_ms: u64,
    pub interrupted: bool,
}

impl RunSummary {
    fn record(&mut self, report: &GameReport) {
        self.games_played += 1;
        let winner = match report.outcome {
            GameOutcome::WhiteWin => {
                self.white_wins += 1;
                Some(report.white)
            }
            GameOutcome::BlackWin => {
                self.black_wins += 1;
                Some(report.white.other())
            }
            GameOutcome::Draw => {
                self.draws += 1;
                None
            }
            GameOutcome::Aborted => {
                self.aborted += 1;
                None
            }
        };
        match winner {
            Some(EngineSlot::A) => self.engine_a_wins += 1,
            Some(EngineSlot::B) => self.engine_b_wins += 1,
            None => {}
        }
    }

    fn progress_message(&self) -> String {
        format!(
            "1-0:{} 0-1:{} draw:{} aborted:{}",
            self.white_wins, self.black_wins, self.draws, self.aborted
        )
    }
}

#[derive(Clone)]
struct GameTicket {
    assignment: RoundAssignment,
}

enum WorkerMessage {
    Finished(Box<GameReport>),
    /// 差し替えエンジンを起動できなかった
    Fatal(EngineError),
}

pub struct Orchestrator {
    config: SelfplayConfig,
    factory: Arc<dyn EngineFactory>,
    shutdown: Arc<AtomicBool>,
    show_progress: bool,
}

impl Orchestrator {
    pub fn new(
        config: SelfplayConfig,
        factory: Arc<dyn EngineFactory>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            factory,
            shutdown,
            show_progress: true,
        }
    }

    /// 進捗バーの表示（テストでは無効にする）
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &SelfplayConfig {
        &self.config
    }

    fn game_config(&self) -> GameConfig {
        let cfg = &self.config;
        GameConfig {
            move_time: cfg.move_time(),
            max_plies: cfg.max_plies,
            opening: OpeningSampler::new(
                cfg.opening_plies,
                cfg.analysis_breadth,
                cfg.opening_time(),
            ),
            opening_guide: cfg.opening_guide,
            record_engine_score: cfg.record_engine_score,
        }
    }

    /// ワーカー数分のエンジンの組を起動する。1つでも失敗したら起動済みのものを終了させる。
    fn spawn_pairs(&self) -> Result<Vec<EnginePair>, EngineError> {
        let mut pairs: Vec<EnginePair> = Vec::with_capacity(self.config.concurrency);
        for _ in 0..self.config.concurrency {
            let a = match self.factory.spawn(EngineSlot::A) {
                Ok(engine) => engine,
                Err(e) => {
                    pairs.iter_mut().for_each(EnginePair::terminate_all);
                    return Err(e);
                }
            };
            let b = match self.factory.spawn(EngineSlot::B) {
                Ok(engine) => engine,
                Err(e) => {
                    let mut a = a;
                    a.terminate();
                    pairs.iter_mut().for_each(EnginePair::terminate_all);
                    return Err(e);
                }
            };
            pairs.push(EnginePair { a, b });
        }
        Ok(pairs)
    }

    pub fn run(&self) -> SelfplayResult<RunSummary> {
        self.config.validate()?;
        let start_sessions = match &self.config.startpos_file {
            Some(path) => load_start_positions(path)?
                .iter()
                .map(|fen| GameSession::from_fen(fen))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let base_seed = self.config.seed.unwrap_or_else(|| rand::rng().random());
        let mut sink = DatasetSink::open(&self.config.dataset)?;
        let mut transcript = match &self.config.transcript {
            Some(path) => Some(TranscriptWriter::open(path)?),
            None => None,
        };
        log::info!("appending records to {}", sink.path().display());
        if let Some(writer) = &transcript {
            log::info!("transcript: {}", writer.path().display());
        }

        let pairs = self.spawn_pairs()?;
        log::info!(
            "starting {} games: {} vs {} ({} worker(s), seed {})",
            self.config.games,
            pairs[0].a.label(),
            pairs[0].b.label(),
            pairs.len(),
            base_seed
        );
        if let Some(writer) = transcript.as_mut() {
            if let Err(e) =
                writer.write_meta(&self.config, pairs[0].a.label(), pairs[0].b.label(), &Local::now())
            {
                let mut pairs = pairs;
                pairs.iter_mut().for_each(EnginePair::terminate_all);
                return Err(e.into());
            }
        }

        // チャネルの作成（ランデブー）
        let (ticket_tx, ticket_rx) = chan::bounded::<GameTicket>(0);
        let (result_tx, result_rx) = chan::bounded::<WorkerMessage>(0);

        let game_config = self.game_config();
        let mut handles = Vec::new();
        for engines in pairs {
            let rx = ticket_rx.clone();
            let tx = result_tx.clone();
            let factory = Arc::clone(&self.factory);
            let game_config = game_config.clone();
            let shutdown = Arc::clone(&self.shutdown);
            handles.push(thread::spawn(move || {
                worker_main(engines, factory, game_config, rx, tx, shutdown);
            }));
        }
        // メインスレッドは送受信の片側だけを持つ
        drop(ticket_rx);
        drop(result_tx);

        let progress = if self.show_progress {
            ProgressBar::new(u64::from(self.config.games))
        } else {
            ProgressBar::hidden()
        };
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} eta:{eta} {msg}")
                .expect("valid template"),
        );

        let start_time = Instant::now();
        let mut summary = RunSummary::default();
        let mut fatal: Option<SelfplayError> = None;
        let mut next_index = 0u32;
        let mut next_ticket = self.make_ticket(next_index, &start_sessions, base_seed);

        let mut handle_message =
            |msg: WorkerMessage, summary: &mut RunSummary, fatal: &mut Option<SelfplayError>| {
                if fatal.is_some() {
                    return;
                }
                match msg {
                    WorkerMessage::Finished(report) => {
                        if let Err(e) =
                            commit_report(&report, &mut sink, transcript.as_mut(), summary)
                        {
                            *fatal = Some(e);
                            return;
                        }
                        progress.inc(1);
                        progress.set_message(summary.progress_message());
                    }
                    WorkerMessage::Fatal(e) => *fatal = Some(e.into()),
                }
            };

        // メインイベントループ
        let mut workers_gone = false;
        while summary.games_played < self.config.games
            && !workers_gone
            && fatal.is_none()
            && !self.shutdown.load(Ordering::SeqCst)
        {
            match &next_ticket {
                None => {
                    // チケットは全送信済み、結果を待つ
                    match result_rx.recv() {
                        Ok(msg) => handle_message(msg, &mut summary, &mut fatal),
                        Err(_) => break,
                    }
                }
                Some(t) => {
                    chan::select! {
                        send(ticket_tx, t.clone()) -> res => {
                            if res.is_ok() {
                                next_index += 1;
                                next_ticket =
                                    self.make_ticket(next_index, &start_sessions, base_seed);
                            } else {
                                // 全ワーカーが終了している
                                workers_gone = true;
                            }
                        }
                        recv(result_rx) -> msg => {
                            match msg {
                                Ok(msg) => handle_message(msg, &mut summary, &mut fatal),
                                Err(_) => workers_gone = true,
                            }
                        }
                    }
                }
            }
        }

        let interrupted = self.shutdown.load(Ordering::SeqCst);
        if fatal.is_some() {
            // 実行中の対局を次の手番で打ち切らせる
            self.shutdown.store(true, Ordering::SeqCst);
        }
        // チケット送信側を閉じるとワーカーはループを抜け、エンジンを終了させる
        drop(ticket_tx);
        for msg in result_rx.iter() {
            handle_message(msg, &mut summary, &mut fatal);
        }
        let mut panicked = false;
        for h in handles {
            panicked |= h.join().is_err();
        }
        drop(handle_message);

        if let Some(e) = fatal {
            progress.abandon();
            return Err(e);
        }
        if panicked {
            return Err(SelfplayError::WorkerPanicked);
        }

        summary.records_written = sink.records_written();
        summary.elapsed_ms = duration_to_millis(start_time.elapsed());
        summary.interrupted = interrupted;
        progress.finish_with_message(summary.progress_message());
        if interrupted {
            log::warn!("interrupted after {} game(s)", summary.games_played);
        }
        if let Some(writer) = transcript.as_mut() {
            writer.write_summary(&summary)?;
        }
        Ok(summary)
    }

    fn make_ticket(
        &self,
        index: u32,
        start_sessions: &[GameSession],
        base_seed: u64,
    ) -> Option<GameTicket> {
        if index >= self.config.games {
            return None;
        }
        let start = if start_sessions.is_empty() {
            GameSession::new()
        } else {
            start_sessions[index as usize % start_sessions.len()].clone()
        };
        Some(GameTicket {
            assignment: RoundAssignment::for_game(index, start, base_seed),
        })
    }
}

/// 対局結果を記録する。データセットへの書き込みは完了局のみ。
fn commit_report(
    report: &GameReport,
    sink: &mut DatasetSink,
    transcript: Option<&mut TranscriptWriter>,
    summary: &mut RunSummary,
) -> SelfplayResult<()> {
    sink.commit(&report.records)?;
    if let Some(writer) = transcript {
        writer.write_game(report)?;
    }
    summary.record(report);
    if report.outcome == GameOutcome::Aborted {
        log::warn!(
            "round {}: {} vs {} aborted ({}), {} move(s) discarded",
            report.round,
            report.white_label,
            report.black_label,
            report.reason.label(),
            report.moves.len()
        );
    } else {
        log::info!(
            "round {}: {} vs {} {} ({}), {} position(s)",
            report.round,
            report.white_label,
            report.black_label,
            report.outcome.result_str(),
            report.reason.label(),
            report.records.len()
        );
    }
    Ok(())
}

fn worker_main(
    mut engines: EnginePair,
    factory: Arc<dyn EngineFactory>,
    game_config: GameConfig,
    rx: chan::Receiver<GameTicket>,
    tx: chan::Sender<WorkerMessage>,
    shutdown: Arc<AtomicBool>,
) {
    let runner = GameRunner::new(&game_config, &shutdown);
    let mut broken: Option<EngineSlot> = None;

    while let Ok(ticket) = rx.recv() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        // 前の局で落ちたエンジンを差し替えてから指す
        if let Some(slot) = broken.take() {
            match factory.spawn(slot) {
                Ok(engine) => {
                    log::info!("restarted {}", engine.label());
                    engines.replace(slot, engine);
                }
                Err(e) => {
                    let _ = tx.send(WorkerMessage::Fatal(e));
                    break;
                }
            }
        }

        let report = runner.run(&ticket.assignment, &mut engines);
        if let Some(slot) = report.failed_engine {
            engines.get_mut(slot).terminate();
            broken = Some(slot);
        }
        if tx.send(WorkerMessage::Finished(Box::new(report))).is_err() {
            break;
        }
    }
    engines.terminate_all();
}
