//! 序盤の多様化
//!
//! ガイド役エンジンの MultiPV 解析から合法な候補を一様に選ぶ。候補が得られない
//! （解析が空・エンジン異常）場合はランダムな合法手で代用する。

use std::time::Duration;

use chess::ChessMove;
use rand::Rng;
use rand::seq::IndexedRandom;

use super::engine::Engine;
use super::error::EngineError;
use super::position::GameSession;

/// 1手の選び方
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickSource {
    Analysis,
    Fallback,
}

/// 序盤フェーズの結果
#[derive(Debug, Default)]
pub struct OpeningSummary {
    pub plies: u32,
    pub fallback_plies: u32,
    /// ガイド役エンジンの失敗（対局自体は続行し、次の要求で表面化させる）
    pub guide_error: Option<EngineError>,
}

#[derive(Clone, Copy, Debug)]
pub struct OpeningSampler {
    plies: u32,
    breadth: u32,
    budget: Duration,
}

impl OpeningSampler {
    pub fn new(plies: u32, breadth: u32, budget: Duration) -> Self {
        Self {
            plies,
            breadth: breadth.max(1),
            budget,
        }
    }

    /// 現局面の解析結果から合法な候補を1つ選ぶ。候補が無ければ `None`。
    pub fn pick_from_analysis<R: Rng + ?Sized>(
        &self,
        guide: &mut dyn Engine,
        session: &GameSession,
        rng: &mut R,
    ) -> Result<Option<ChessMove>, EngineError> {
        guide.set_position(session.start_fen(), session.moves())?;
        let candidates = guide.request_analysis(self.budget, self.breadth)?;
        let legal: Vec<ChessMove> =
            candidates.iter().filter_map(|c| session.parse_legal_move(&c.mv)).collect();
        if legal.len() < candidates.len() {
            log::debug!(
                "{}: dropped {} illegal candidate(s) at ply {}",
                guide.label(),
                candidates.len() - legal.len(),
                session.ply()
            );
        }
        Ok(legal.choose(rng).copied())
    }

    /// 合法手から一様に選ぶ。合法手が無ければ `None`。
    pub fn fallback<R: Rng + ?Sized>(&self, session: &GameSession, rng: &mut R) -> Option<ChessMove> {
        session.legal_moves().choose(rng).copied()
    }

    /// 序盤 `plies` 手を進める。終局したらそこで止める。
    ///
    /// ガイド役が一度失敗したら残りの序盤はランダムな合法手で進める。
    pub fn play<R: Rng + ?Sized>(
        &self,
        guide: &mut dyn Engine,
        session: &mut GameSession,
        rng: &mut R,
    ) -> OpeningSummary {
        let mut summary = OpeningSummary::default();
        for _ in 0..self.plies {
            if session.terminal_state().is_some() {
                break;
            }
            let analysed = if summary.guide_error.is_none() {
                match self.pick_from_analysis(guide, session, rng) {
                    Ok(Some(mv)) => Some(mv),
                    Ok(None) => {
                        log::debug!(
                            "analysis empty at ply {}, using a random legal move",
                            session.ply()
                        );
                        None
                    }
                    Err(e) => {
                        log::warn!("opening guide failed at ply {}: {e}", session.ply());
                        summary.guide_error = Some(e);
                        None
                    }
                }
            } else {
                None
            };
            let (mv, source) = match analysed {
                Some(mv) => (mv, PickSource::Analysis),
                None => match self.fallback(session, rng) {
                    Some(mv) => (mv, PickSource::Fallback),
                    None => break,
                },
            };
            if source == PickSource::Fallback {
                summary.fallback_plies += 1;
            }
            session.apply(mv);
            summary.plies += 1;
        }
        summary
    }
}
