use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chess::Color;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::engine::Engine;
use super::error::EngineError;
use super::label::{PendingPosition, PositionRecord, label_positions};
use super::opening::OpeningSampler;
use super::position::{GameSession, TerminalState};
use super::types::{EngineSlot, GameOutcome, side_label};

/// ゲーム設定
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub move_time: Duration,
    /// 1局で記録する局面数の上限
    pub max_plies: u32,
    pub opening: OpeningSampler,
    pub opening_guide: EngineSlot,
    pub record_engine_score: bool,
}

/// 対局が中断された理由
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    EngineTerminated,
    EngineTimeout,
    IllegalMove,
    Interrupted,
}

impl AbortReason {
    pub fn label(self) -> &'static str {
        match self {
            AbortReason::EngineTerminated => "engine_terminated",
            AbortReason::EngineTimeout => "engine_timeout",
            AbortReason::IllegalMove => "illegal_move",
            AbortReason::Interrupted => "interrupted",
        }
    }
}

impl From<&EngineError> for AbortReason {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Timeout { .. } => AbortReason::EngineTimeout,
            EngineError::Terminated { .. } | EngineError::Unavailable { .. } => {
                AbortReason::EngineTerminated
            }
        }
    }
}

/// 終局理由
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    Terminal(TerminalState),
    PlyCap,
    Aborted(AbortReason),
}

impl EndReason {
    pub fn label(self) -> &'static str {
        match self {
            EndReason::Terminal(state) => state.label(),
            EndReason::PlyCap => "ply_cap",
            EndReason::Aborted(reason) => reason.label(),
        }
    }
}

/// 1局分の割り当て（手番ごとのエンジン・開始局面・乱数シード）
#[derive(Clone, Debug)]
pub struct RoundAssignment {
    /// 1 始まり
    pub round: u32,
    pub white: EngineSlot,
    pub start: GameSession,
    pub seed: u64,
}

impl RoundAssignment {
    /// 0 始まりの局番号 `index` の割り当て。偶数局は A が白。
    pub fn for_game(index: u32, start: GameSession, base_seed: u64) -> Self {
        Self {
            round: index + 1,
            white: if index % 2 == 0 { EngineSlot::A } else { EngineSlot::B },
            start,
            seed: base_seed.wrapping_add(u64::from(index)),
        }
    }

    pub fn slot_for(&self, color: Color) -> EngineSlot {
        if color == Color::White { self.white } else { self.white.other() }
    }
}

/// 1ワーカーが所有するエンジンの組
pub struct EnginePair {
    pub a: Box<dyn Engine>,
    pub b: Box<dyn Engine>,
}

impl EnginePair {
    pub fn get_mut(&mut self, slot: EngineSlot) -> &mut dyn Engine {
        match slot {
            EngineSlot::A => self.a.as_mut(),
            EngineSlot::B => self.b.as_mut(),
        }
    }

    pub fn get(&self, slot: EngineSlot) -> &dyn Engine {
        match slot {
            EngineSlot::A => self.a.as_ref(),
            EngineSlot::B => self.b.as_ref(),
        }
    }

    /// 故障したエンジンを差し替える。古い方は終了させる。
    pub fn replace(&mut self, slot: EngineSlot, engine: Box<dyn Engine>) {
        let mut old = match slot {
            EngineSlot::A => std::mem::replace(&mut self.a, engine),
            EngineSlot::B => std::mem::replace(&mut self.b, engine),
        };
        old.terminate();
    }

    pub fn terminate_all(&mut self) {
        self.a.terminate();
        self.b.terminate();
    }
}

/// 対局結果
#[derive(Clone, Debug)]
pub struct GameReport {
    pub round: u32,
    pub white: EngineSlot,
    pub white_label: String,
    pub black_label: String,
    pub start_fen: Option<String>,
    pub moves: Vec<String>,
    pub opening_plies: u32,
    pub outcome: GameOutcome,
    pub reason: EndReason,
    /// 中断局では空
    pub records: Vec<PositionRecord>,
    /// 中断の原因になったエンジン（差し替え対象）
    pub failed_engine: Option<EngineSlot>,
}

enum Phase {
    Opening,
    Playing,
    Completed(GameOutcome, EndReason),
    Aborted(AbortReason, Option<EngineSlot>),
}

/// 1局を `Opening → Playing → {Completed, Aborted}` で進める。
pub struct GameRunner<'a> {
    config: &'a GameConfig,
    shutdown: &'a AtomicBool,
}

impl<'a> GameRunner<'a> {
    pub fn new(config: &'a GameConfig, shutdown: &'a AtomicBool) -> Self {
        Self { config, shutdown }
    }

    pub fn run(&self, assignment: &RoundAssignment, engines: &mut EnginePair) -> GameReport {
        let mut session = assignment.start.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(assignment.seed);
        let mut pending: Vec<PendingPosition> = Vec::new();
        let mut opening_plies = 0;
        // 序盤で失敗したガイド役と、その原因
        let mut guide_failure: Option<(EngineSlot, AbortReason)> = None;

        let mut phase = Phase::Opening;
        for slot in [EngineSlot::A, EngineSlot::B] {
            if let Err(e) = engines.get_mut(slot).new_game() {
                log::warn!("round {}: {e}", assignment.round);
                phase = Phase::Aborted(AbortReason::from(&e), Some(slot));
                break;
            }
        }

        let finished = loop {
            phase = match phase {
                Phase::Opening => {
                    let guide = engines.get_mut(self.config.opening_guide);
                    let summary = self.config.opening.play(guide, &mut session, &mut rng);
                    opening_plies = summary.plies;
                    if let Some(e) = &summary.guide_error {
                        guide_failure = Some((self.config.opening_guide, AbortReason::from(e)));
                    }
                    log::debug!(
                        "round {}: opening {} plies ({} random) -> {}",
                        assignment.round,
                        summary.plies,
                        summary.fallback_plies,
                        session.fen()
                    );
                    Phase::Playing
                }
                Phase::Playing => self.step(assignment, engines, &mut session, &mut pending),
                Phase::Completed(outcome, reason) => break Ok((outcome, reason)),
                Phase::Aborted(reason, slot) => break Err((reason, slot)),
            };
        };

        // ガイド役が落ちた局は、終局してもそのエンジンを差し替え対象にする。
        // 同じエンジンで中断した場合は序盤での失敗原因を優先する。
        let (outcome, reason, records, failed_engine) = match finished {
            Ok((outcome, reason)) => (
                outcome,
                reason,
                label_positions(pending, outcome),
                guide_failure.map(|(slot, _)| slot),
            ),
            Err((reason, slot)) => {
                let reason = match guide_failure {
                    Some((guide, cause)) if slot == Some(guide) => cause,
                    _ => reason,
                };
                let failed = slot.or(guide_failure.map(|(guide, _)| guide));
                (GameOutcome::Aborted, EndReason::Aborted(reason), Vec::new(), failed)
            }
        };

        GameReport {
            round: assignment.round,
            white: assignment.white,
            white_label: engines.get(assignment.white).label().to_string(),
            black_label: engines.get(assignment.white.other()).label().to_string(),
            start_fen: assignment.start.start_fen().map(str::to_string),
            moves: session.moves().to_vec(),
            opening_plies,
            outcome,
            reason,
            records,
            failed_engine,
        }
    }

    /// Playing 中の1手
    fn step(
        &self,
        assignment: &RoundAssignment,
        engines: &mut EnginePair,
        session: &mut GameSession,
        pending: &mut Vec<PendingPosition>,
    ) -> Phase {
        if self.shutdown.load(Ordering::SeqCst) {
            return Phase::Aborted(AbortReason::Interrupted, None);
        }
        if let Some(state) = session.terminal_state() {
            return Phase::Completed(state.outcome(), EndReason::Terminal(state));
        }
        if pending.len() >= self.config.max_plies as usize {
            return Phase::Completed(GameOutcome::Draw, EndReason::PlyCap);
        }

        let side = session.side_to_move();
        let slot = assignment.slot_for(side);
        let engine = engines.get_mut(slot);
        let search = engine
            .set_position(session.start_fen(), session.moves())
            .and_then(|_| engine.request_move(self.config.move_time));
        let search = match search {
            Ok(search) => search,
            Err(e) => {
                log::warn!("round {}: {e}", assignment.round);
                return Phase::Aborted(AbortReason::from(&e), Some(slot));
            }
        };

        let Some(mv) = search.bestmove.as_deref().and_then(|uci| session.parse_legal_move(uci))
        else {
            log::warn!(
                "round {}: {} ({}) returned an illegal move {:?} at {}",
                assignment.round,
                engine.label(),
                side_label(side),
                search.bestmove,
                session.fen()
            );
            return Phase::Aborted(AbortReason::IllegalMove, Some(slot));
        };

        let score = if self.config.record_engine_score {
            search.score.map(|s| s.white_relative_cp(side)).unwrap_or(0)
        } else {
            0
        };
        pending.push(PendingPosition {
            fen: session.fen(),
            score,
        });
        session.apply(mv);
        Phase::Playing
    }
}
