pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod label;
pub mod opening;
pub mod options;
pub mod orchestrator;
pub mod position;
pub mod sink;
pub mod types;

pub use config::{EngineConfig, EngineSection, SelfplayConfig};
pub use engine::{Engine, EngineFactory, EngineProcess, ProcessEngineFactory};
pub use error::{ConfigError, EngineError, SelfplayError, SelfplayResult, SinkError};
pub use game::{
    AbortReason, EndReason, EnginePair, GameConfig, GameReport, GameRunner, RoundAssignment,
};
pub use label::{PendingPosition, PositionRecord, label_for, label_positions};
pub use opening::{OpeningSampler, OpeningSummary};
pub use options::{EngineOption, EngineOptions, OptionValue};
pub use orchestrator::{Orchestrator, RunSummary};
pub use position::{GameSession, TerminalState, load_start_positions};
pub use sink::{DatasetSink, TranscriptWriter, default_transcript_path};
pub use types::{
    CandidateMove, EngineSlot, GameOutcome, Score, SearchOutcome, SessionState,
    duration_to_millis, side_label,
};
