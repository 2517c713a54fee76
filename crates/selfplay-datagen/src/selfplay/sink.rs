//! 学習データ / 棋譜ログの出力
//!
//! データセットは 1 局分の行をまとめて 1 回の `write_all` で追記し、`sync_data`
//! まで行う。前回の実行が行の途中で落ちていた場合は、開いた時点で末尾の
//! 不完全な行を切り詰めるので、ファイル中の行は常に完全な形になる。

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use super::config::SelfplayConfig;
use super::error::SinkError;
use super::game::GameReport;
use super::label::PositionRecord;
use super::types::EngineSlot;
use crate::common::io::open_append;

const TAIL_SCAN_CHUNK: u64 = 64 * 1024;

/// 追記専用のデータセット
pub struct DatasetSink {
    path: PathBuf,
    file: File,
    records_written: u64,
}

impl DatasetSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let open_err = |source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        };
        let mut file = open_append(path).map_err(open_err)?;
        if let Some(dropped) = repair_tail(&mut file).map_err(open_err)? {
            log::warn!(
                "{}: dropped {} bytes of an incomplete trailing line",
                path.display(),
                dropped
            );
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            records_written: 0,
        })
    }

    /// 1 局分をまとめて書き込む。失敗したら書き込み前の長さに戻す。
    pub fn commit(&mut self, records: &[PositionRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::with_capacity(records.len() * 96);
        for record in records {
            buf.push_str(&record.to_string());
            buf.push('\n');
        }
        let write_err = |source| SinkError::Write {
            path: self.path.clone(),
            source,
        };
        let len_before = self.file.metadata().map_err(write_err)?.len();
        let result = self
            .file
            .write_all(buf.as_bytes())
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data());
        if let Err(source) = result {
            if let Err(e) = self.file.set_len(len_before) {
                log::warn!(
                    "{}: could not roll back a partial write: {e}",
                    self.path.display()
                );
            }
            return Err(write_err(source));
        }
        self.records_written += records.len() as u64;
        Ok(())
    }

    /// この実行で書き込んだ行数
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 末尾が改行で終わっていなければ、最後の改行の直後まで切り詰める。
/// 切り詰めたバイト数を返す。
fn repair_tail(file: &mut File) -> io::Result<Option<u64>> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(None);
    }

    let mut end = len;
    let mut keep = 0;
    let mut chunk = Vec::new();
    while end > 0 {
        let start = end.saturating_sub(TAIL_SCAN_CHUNK);
        chunk.resize((end - start) as usize, 0);
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            keep = start + pos as u64 + 1;
            break;
        }
        end = start;
    }
    file.set_len(keep)?;
    Ok(Some(len - keep))
}

#[derive(Serialize)]
struct MetaLog<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    engine_a: &'a str,
    engine_b: &'a str,
    settings: &'a SelfplayConfig,
}

#[derive(Serialize)]
struct GameLog<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    round: u32,
    white: &'a str,
    black: &'a str,
    white_slot: EngineSlot,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_fen: Option<&'a str>,
    moves: &'a [String],
    opening_plies: u32,
    outcome: &'static str,
    result: &'static str,
    reason: &'static str,
    records: usize,
}

#[derive(Serialize)]
struct SummaryLog<'a, S: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    #[serde(flatten)]
    summary: &'a S,
}

/// JSONL 形式の棋譜ログ（meta / game / summary）
pub struct TranscriptWriter {
    path: PathBuf,
    file: File,
}

impl TranscriptWriter {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = open_append(path).map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_meta(
        &mut self,
        config: &SelfplayConfig,
        engine_a: &str,
        engine_b: &str,
        timestamp: &DateTime<Local>,
    ) -> Result<(), SinkError> {
        self.write_entry(&MetaLog {
            kind: "meta",
            timestamp: timestamp.to_rfc3339(),
            engine_a,
            engine_b,
            settings: config,
        })
    }

    pub fn write_game(&mut self, report: &GameReport) -> Result<(), SinkError> {
        self.write_entry(&GameLog {
            kind: "game",
            round: report.round,
            white: &report.white_label,
            black: &report.black_label,
            white_slot: report.white,
            start_fen: report.start_fen.as_deref(),
            moves: &report.moves,
            opening_plies: report.opening_plies,
            outcome: report.outcome.label(),
            result: report.outcome.result_str(),
            reason: report.reason.label(),
            records: report.records.len(),
        })
    }

    pub fn write_summary<S: Serialize>(&mut self, summary: &S) -> Result<(), SinkError> {
        self.write_entry(&SummaryLog {
            kind: "summary",
            timestamp: Local::now().to_rfc3339(),
            summary,
        })
    }

    fn write_entry<T: Serialize>(&mut self, entry: &T) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .map_err(|source| SinkError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// `--transcript` にパスが無いときの既定値
pub fn default_transcript_path(timestamp: &DateTime<Local>) -> PathBuf {
    let dir = PathBuf::from("runs/selfplay");
    let name = format!("{}-selfplay.jsonl", timestamp.format("%Y%m%d-%H%M%S"));
    dir.join(name)
}
