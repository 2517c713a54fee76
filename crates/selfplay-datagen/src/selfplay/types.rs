use chess::Color;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 評価値（手番側から見た値）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

/// 学習データに書き込む評価値の上限（詰みもこの値にクリップ）
pub const SCORE_CLIP: i32 = 10_000;

impl Score {
    /// 白視点のセンチポーンへ変換する。詰みスコアは ±SCORE_CLIP にクリップ。
    pub fn white_relative_cp(self, side_to_move: Color) -> i32 {
        let stm = match self {
            Score::Cp(cp) => cp.clamp(-SCORE_CLIP, SCORE_CLIP),
            Score::Mate(m) if m > 0 => SCORE_CLIP,
            Score::Mate(_) => -SCORE_CLIP,
        };
        if side_to_move == Color::White { stm } else { -stm }
    }
}

/// multipv 解析で得られる候補手
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateMove {
    /// 候補手（UCI 表記、PV の先頭）
    pub mv: String,
    /// PV 順位（1 始まり）
    pub rank: u32,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

/// `info` 行の解析結果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

impl InfoLine {
    pub fn rank(&self) -> u32 {
        self.multipv.unwrap_or(1)
    }
}

/// `info ...` 行をパースする。`info` で始まらなければ `None`。
pub fn parse_info_line(line: &str) -> Option<InfoLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first().copied() != Some("info") {
        return None;
    }
    let mut info = InfoLine::default();
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                if i + 1 < tokens.len() {
                    info.depth = tokens[i + 1].parse::<u32>().ok();
                    i += 1;
                }
            }
            "multipv" => {
                if i + 1 < tokens.len() {
                    info.multipv = tokens[i + 1].parse::<u32>().ok();
                    i += 1;
                }
            }
            "score" => {
                if i + 2 < tokens.len() {
                    match tokens[i + 1] {
                        "cp" => info.score = tokens[i + 2].parse::<i32>().ok().map(Score::Cp),
                        "mate" => info.score = tokens[i + 2].parse::<i32>().ok().map(Score::Mate),
                        _ => {}
                    }
                    i += 2;
                }
            }
            // `info string ...` は自由文なので以降を読まない
            "string" => break,
            "pv" => {
                info.pv = tokens[i + 1..].iter().map(|s| s.to_string()).collect();
                break;
            }
            _ => {}
        }
        i += 1;
    }
    Some(info)
}

/// `request_move` の結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchOutcome {
    /// `None` は `bestmove (none)` / `0000` などの null move
    pub bestmove: Option<String>,
    pub elapsed_ms: u64,
    /// 最後に受け取った multipv=1 のスコア（手番側視点）
    pub score: Option<Score>,
}

/// エンジンのプロトコルセッション状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Busy,
    Terminated,
}

/// 対局ペアのどちらのエンジンか
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineSlot {
    A,
    B,
}

impl EngineSlot {
    pub fn other(self) -> Self {
        match self {
            EngineSlot::A => EngineSlot::B,
            EngineSlot::B => EngineSlot::A,
        }
    }
}

/// 対局結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    WhiteWin,
    BlackWin,
    Draw,
    Aborted,
}

impl GameOutcome {
    pub fn label(self) -> &'static str {
        match self {
            GameOutcome::WhiteWin => "white_win",
            GameOutcome::BlackWin => "black_win",
            GameOutcome::Draw => "draw",
            GameOutcome::Aborted => "aborted",
        }
    }

    /// PGN 風の結果表記
    pub fn result_str(self) -> &'static str {
        match self {
            GameOutcome::WhiteWin => "1-0",
            GameOutcome::BlackWin => "0-1",
            GameOutcome::Draw => "1/2-1/2",
            GameOutcome::Aborted => "*",
        }
    }
}

pub fn side_label(color: Color) -> char {
    if color == Color::White { 'w' } else { 'b' }
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_line_parses_multipv_entry() {
        let info = parse_info_line(
            "info depth 12 seldepth 15 multipv 3 score cp -21 nodes 4521 nps 90000 pv g1f3 d7d5 d2d4",
        )
        .unwrap();
        assert_eq!(info.depth, Some(12));
        assert_eq!(info.rank(), 3);
        assert_eq!(info.score, Some(Score::Cp(-21)));
        assert_eq!(info.pv, vec!["g1f3", "d7d5", "d2d4"]);

        let mate = parse_info_line("info depth 5 score mate -2 pv e1e2").unwrap();
        assert_eq!(mate.rank(), 1);
        assert_eq!(mate.score, Some(Score::Mate(-2)));
    }

    #[test]
    fn info_line_ignores_free_text_and_other_lines() {
        assert!(parse_info_line("bestmove e2e4").is_none());
        let info = parse_info_line("info string pv is not a pv here").unwrap();
        assert!(info.pv.is_empty());
    }

    #[test]
    fn score_is_converted_to_white_perspective() {
        assert_eq!(Score::Cp(35).white_relative_cp(Color::White), 35);
        assert_eq!(Score::Cp(35).white_relative_cp(Color::Black), -35);
        assert_eq!(Score::Cp(99_999).white_relative_cp(Color::White), SCORE_CLIP);
        assert_eq!(Score::Mate(3).white_relative_cp(Color::Black), -SCORE_CLIP);
        assert_eq!(Score::Mate(-1).white_relative_cp(Color::Black), SCORE_CLIP);
    }
}
