//! 対局結果から学習ラベルを付ける

use std::fmt;

use serde::Serialize;

use super::types::GameOutcome;

pub const WHITE_WIN_LABEL: f32 = 1.0;
pub const BLACK_WIN_LABEL: f32 = 0.0;
pub const DRAW_LABEL: f32 = 0.5;

/// 結果に対応するラベル。中断局はラベルなし（記録しない）。
pub fn label_for(outcome: GameOutcome) -> Option<f32> {
    match outcome {
        GameOutcome::WhiteWin => Some(WHITE_WIN_LABEL),
        GameOutcome::BlackWin => Some(BLACK_WIN_LABEL),
        GameOutcome::Draw => Some(DRAW_LABEL),
        GameOutcome::Aborted => None,
    }
}

/// 終局前に貯めておく局面（ラベル未確定）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPosition {
    pub fen: String,
    pub score: i32,
}

/// データセットの1行
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PositionRecord {
    pub fen: String,
    pub score: i32,
    pub label: f32,
}

impl fmt::Display for PositionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {:.4}", self.fen, self.score, self.label)
    }
}

/// 1局分の局面すべてに同じラベルを付ける。中断局なら空。
pub fn label_positions(pending: Vec<PendingPosition>, outcome: GameOutcome) -> Vec<PositionRecord> {
    let Some(label) = label_for(outcome) else {
        return Vec::new();
    };
    pending
        .into_iter()
        .map(|p| PositionRecord {
            fen: p.fen,
            score: p.score,
            label,
        })
        .collect()
}
