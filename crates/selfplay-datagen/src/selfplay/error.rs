//! 自己対局ハーネスのエラー型
//!
//! エンジン単位の失敗（起動不能・異常終了・応答なし）、設定の不備、出力先の
//! 書き込み失敗を区別する。対局単位で回復できるものは `AbortReason` として
//! `game` モジュール側で扱い、ここに残るのは呼び出し元まで伝播させるものだけ。

use std::path::PathBuf;

/// エンジンプロセスとの通信で発生するエラー
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// 起動できない、またはハンドシェイクが完了しない（致命的）
    #[error("{label}: engine unavailable: {reason}")]
    Unavailable { label: String, reason: String },

    /// プロセスが終了している（stdout が閉じた / stdin が書き込めない）
    #[error("{label}: engine process terminated")]
    Terminated { label: String },

    /// 思考時間 + 猶予を過ぎても bestmove が返らない
    #[error("{label}: no response within {waited_ms}ms")]
    Timeout { label: String, waited_ms: u64 },
}

impl EngineError {
    pub fn label(&self) -> &str {
        match self {
            EngineError::Unavailable { label, .. }
            | EngineError::Terminated { label }
            | EngineError::Timeout { label, .. } => label,
        }
    }
}

/// 設定値の検証エラー。エンジン起動前に検出する。
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid engine option '{0}': expected Name=Value")]
    OptionSyntax(String),

    #[error("engine option '{name}': {reason}")]
    OptionValue { name: String, reason: String },

    #[error("{field} must be at least {min}")]
    TooSmall { field: &'static str, min: u64 },

    #[error("{0}: engine path is empty")]
    MissingEnginePath(&'static str),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid start position: {0}")]
    StartPosition(String),
}

/// データセット / 棋譜ログへの書き込み失敗（致命的）
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode transcript entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `Orchestrator::run` が返す致命的エラー
#[derive(thiserror::Error, Debug)]
pub enum SelfplayError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

pub type SelfplayResult<T> = Result<T, SelfplayError>;
