//! 対局中の局面管理と終局判定
//!
//! 合法手生成と指し手適用は `chess` クレートに任せ、手数カウンタ・局面履歴と
//! `chess` が持たない終局条件（駒不足・75手ルール・5回同一局面）をここで補う。

use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use chess::{BitBoard, Board, BoardStatus, ChessMove, Color, MoveGen, Piece};

use super::error::ConfigError;
use super::types::GameOutcome;
use crate::common::io::open_reader;

/// 75手ルール（半手数）
pub const SEVENTY_FIVE_MOVE_PLIES: u32 = 150;
/// 同一局面がこの回数現れたら引き分け
pub const FIVEFOLD_REPETITION: usize = 5;

const DARK_SQUARES: BitBoard = BitBoard(0xAA55_AA55_AA55_AA55);

/// 終局状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalState {
    Checkmate { winner: Color },
    Stalemate,
    InsufficientMaterial,
    SeventyFiveMoves,
    FivefoldRepetition,
}

impl TerminalState {
    pub fn outcome(self) -> GameOutcome {
        match self {
            TerminalState::Checkmate {
                winner: Color::White,
            } => GameOutcome::WhiteWin,
            TerminalState::Checkmate {
                winner: Color::Black,
            } => GameOutcome::BlackWin,
            _ => GameOutcome::Draw,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TerminalState::Checkmate { .. } => "checkmate",
            TerminalState::Stalemate => "stalemate",
            TerminalState::InsufficientMaterial => "insufficient_material",
            TerminalState::SeventyFiveMoves => "seventyfive_moves",
            TerminalState::FivefoldRepetition => "fivefold_repetition",
        }
    }
}

/// 1局分の局面と指し手列
#[derive(Clone, Debug)]
pub struct GameSession {
    start_fen: Option<String>,
    board: Board,
    moves: Vec<String>,
    halfmove_clock: u32,
    fullmove_number: u32,
    history: Vec<u64>,
}

impl Default for GameSession {
    fn default() -> Self {
        Self::from_board(None, Board::default(), 0, 1)
    }
}

impl GameSession {
    /// 平手初期局面から始める。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fen(fen: &str) -> Result<Self, ConfigError> {
        let fen = fen.trim();
        let board = Board::from_str(fen)
            .map_err(|e| ConfigError::StartPosition(format!("{fen}: {e}")))?;
        let fields: Vec<&str> = fen.split_whitespace().collect();
        let halfmove = fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);
        let fullmove = fields.get(5).and_then(|s| s.parse().ok()).unwrap_or(1).max(1);
        Ok(Self::from_board(Some(fen.to_string()), board, halfmove, fullmove))
    }

    fn from_board(start_fen: Option<String>, board: Board, halfmove: u32, fullmove: u32) -> Self {
        Self {
            start_fen,
            history: vec![board.get_hash()],
            board,
            moves: Vec::new(),
            halfmove_clock: halfmove,
            fullmove_number: fullmove,
        }
    }

    /// 開始局面の FEN。平手なら `None`（エンジンには `position startpos` を送る）。
    pub fn start_fen(&self) -> Option<&str> {
        self.start_fen.as_deref()
    }

    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    pub fn ply(&self) -> usize {
        self.moves.len()
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    /// 手数カウンタ込みの FEN
    pub fn fen(&self) -> String {
        let board_fen = self.board.to_string();
        let fields: Vec<&str> = board_fen.split_whitespace().take(3).collect();
        format!(
            "{} {} {} {}",
            fields.join(" "),
            self.en_passant_target(),
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    /// FEN のアンパッサン欄。`Board::en_passant` は取られる側のポーンの位置なので、
    /// その1段後ろ（白番なら6段目、黒番なら3段目）を返す。
    fn en_passant_target(&self) -> String {
        let target = self.board.en_passant().and_then(|sq| match self.board.side_to_move() {
            Color::White => sq.up(),
            Color::Black => sq.down(),
        });
        target.map_or_else(|| "-".to_string(), |sq| sq.to_string())
    }

    pub fn legal_moves(&self) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.board).collect()
    }

    /// UCI 表記の指し手を現局面の合法手と照合する。
    pub fn parse_legal_move(&self, uci: &str) -> Option<ChessMove> {
        let uci = uci.trim().to_ascii_lowercase();
        MoveGen::new_legal(&self.board).find(|mv| mv.to_string() == uci)
    }

    /// 合法手を適用する。合法性は呼び出し側で確認済みであること。
    pub fn apply(&mut self, mv: ChessMove) {
        let irreversible = self.board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            || self.board.piece_on(mv.get_dest()).is_some();
        if self.board.side_to_move() == Color::Black {
            self.fullmove_number += 1;
        }
        self.halfmove_clock = if irreversible { 0 } else { self.halfmove_clock + 1 };
        self.board = self.board.make_move_new(mv);
        self.moves.push(mv.to_string());
        self.history.push(self.board.get_hash());
    }

    pub fn terminal_state(&self) -> Option<TerminalState> {
        match self.board.status() {
            BoardStatus::Checkmate => {
                return Some(TerminalState::Checkmate {
                    winner: !self.board.side_to_move(),
                });
            }
            BoardStatus::Stalemate => return Some(TerminalState::Stalemate),
            BoardStatus::Ongoing => {}
        }
        if insufficient_material(&self.board) {
            return Some(TerminalState::InsufficientMaterial);
        }
        if self.halfmove_clock >= SEVENTY_FIVE_MOVE_PLIES {
            return Some(TerminalState::SeventyFiveMoves);
        }
        let current = self.board.get_hash();
        if self.history.iter().filter(|&&h| h == current).count() >= FIVEFOLD_REPETITION {
            return Some(TerminalState::FivefoldRepetition);
        }
        None
    }
}

/// どちらもチェックメイトできない駒構成か（K vs K、K+小駒1枚、同色ビショップのみ）。
pub fn insufficient_material(board: &Board) -> bool {
    let heavy = *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
    if heavy.popcnt() > 0 {
        return false;
    }
    let knights = board.pieces(Piece::Knight).popcnt();
    let bishops = *board.pieces(Piece::Bishop);
    if knights + bishops.popcnt() <= 1 {
        return true;
    }
    if knights == 0 {
        let on_dark = (bishops & DARK_SQUARES).popcnt();
        return on_dark == 0 || on_dark == bishops.popcnt();
    }
    false
}

/// 開始局面ファイルを読む。1行1FEN、空行と `#` 以降はコメント。`.gz` 可。
pub fn load_start_positions(path: &Path) -> Result<Vec<String>, ConfigError> {
    let reader = open_reader(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut positions = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let trimmed = line.split('#').next().unwrap_or_default().trim();
        if trimmed.is_empty() {
            continue;
        }
        let session = GameSession::from_fen(trimmed).map_err(|e| {
            ConfigError::StartPosition(format!("{}:{}: {e}", path.display(), idx + 1))
        })?;
        if session.terminal_state().is_some() {
            return Err(ConfigError::StartPosition(format!(
                "{}:{}: position is already finished",
                path.display(),
                idx + 1
            )));
        }
        positions.push(trimmed.to_string());
    }
    if positions.is_empty() {
        return Err(ConfigError::StartPosition(format!(
            "no usable positions found in {}",
            path.display()
        )));
    }
    Ok(positions)
}
