//! Common test utilities: in-process scripted engines and a factory that tracks them

#![allow(dead_code)] // These utilities may be used by various test files

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use selfplay_datagen::selfplay::{
    CandidateMove, Engine, EngineError, EngineFactory, EngineSlot, GameSession, Score,
    SearchOutcome, SelfplayConfig, SessionState,
};

/// How a scripted engine chooses its move
#[derive(Clone, Debug)]
pub enum Policy {
    /// The k-th move request of a game answers `moves[k]` (null move when exhausted)
    Script(Vec<String>),
    /// First legal move from the preference list, otherwise the first legal move
    Prefer(Vec<String>),
}

/// Knight shuffle that never ends a game on its own within a few dozen plies
pub fn knight_shuffle() -> Policy {
    Policy::Prefer(
        ["g1f3", "f3g1", "g8f6", "f6g8"].iter().map(|s| s.to_string()).collect(),
    )
}

pub fn script(moves: &[&str]) -> Policy {
    Policy::Script(moves.iter().map(|s| s.to_string()).collect())
}

#[derive(Clone, Debug)]
pub struct StubSpec {
    pub policy: Policy,
    /// Process "dies" when asked for a move after this many answered requests
    pub die_after: Option<u32>,
    /// Candidate moves returned by analysis (empty = no PV lines)
    pub analysis: Vec<String>,
    /// Analysis never answers: the engine is terminated and reports a timeout
    pub analysis_timeout: bool,
    pub score: Option<Score>,
    /// Raise the flag after this many answered move requests
    pub interrupt_after: Option<(u32, Arc<AtomicBool>)>,
}

impl StubSpec {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            die_after: None,
            analysis: Vec::new(),
            analysis_timeout: false,
            score: None,
            interrupt_after: None,
        }
    }
}

pub struct ScriptedEngine {
    label: String,
    spec: StubSpec,
    session: GameSession,
    requests_in_game: usize,
    answered: u32,
    state: SessionState,
    terminated: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub fn new(label: &str, spec: StubSpec) -> (Self, Arc<AtomicBool>) {
        let terminated = Arc::new(AtomicBool::new(false));
        let engine = Self {
            label: label.to_string(),
            spec,
            session: GameSession::new(),
            requests_in_game: 0,
            answered: 0,
            state: SessionState::Ready,
            terminated: terminated.clone(),
        };
        (engine, terminated)
    }

    fn dead(&self) -> EngineError {
        EngineError::Terminated {
            label: self.label.clone(),
        }
    }

    fn check_alive(&self) -> Result<(), EngineError> {
        if self.state == SessionState::Terminated { Err(self.dead()) } else { Ok(()) }
    }

    fn choose(&self) -> Option<String> {
        match &self.spec.policy {
            Policy::Script(moves) => moves.get(self.requests_in_game).cloned(),
            Policy::Prefer(preferred) => preferred
                .iter()
                .find(|mv| self.session.parse_legal_move(mv).is_some())
                .cloned()
                .or_else(|| self.session.legal_moves().first().map(|mv| mv.to_string())),
        }
    }
}

impl Engine for ScriptedEngine {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn new_game(&mut self) -> Result<(), EngineError> {
        self.check_alive()?;
        self.requests_in_game = 0;
        self.session = GameSession::new();
        Ok(())
    }

    fn set_position(
        &mut self,
        start_fen: Option<&str>,
        moves: &[String],
    ) -> Result<(), EngineError> {
        self.check_alive()?;
        let mut session = match start_fen {
            Some(fen) => GameSession::from_fen(fen).expect("valid start fen"),
            None => GameSession::new(),
        };
        for uci in moves {
            let mv = session.parse_legal_move(uci).expect("position moves are legal");
            session.apply(mv);
        }
        self.session = session;
        Ok(())
    }

    fn request_move(&mut self, _budget: Duration) -> Result<SearchOutcome, EngineError> {
        self.check_alive()?;
        if self.spec.die_after.is_some_and(|n| self.answered >= n) {
            self.state = SessionState::Terminated;
            self.terminated.store(true, Ordering::SeqCst);
            return Err(self.dead());
        }
        let bestmove = self.choose();
        self.requests_in_game += 1;
        self.answered += 1;
        if let Some((n, flag)) = &self.spec.interrupt_after {
            if self.answered >= *n {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(SearchOutcome {
            bestmove,
            elapsed_ms: 1,
            score: self.spec.score,
        })
    }

    fn request_analysis(
        &mut self,
        _budget: Duration,
        breadth: u32,
    ) -> Result<Vec<CandidateMove>, EngineError> {
        self.check_alive()?;
        if self.spec.analysis_timeout {
            self.terminate();
            return Err(EngineError::Timeout {
                label: self.label.clone(),
                waited_ms: 1,
            });
        }
        Ok(self
            .spec
            .analysis
            .iter()
            .take(breadth as usize)
            .enumerate()
            .map(|(i, mv)| CandidateMove {
                mv: mv.clone(),
                rank: i as u32 + 1,
                score: None,
                pv: vec![mv.clone()],
            })
            .collect())
    }

    fn terminate(&mut self) {
        self.state = SessionState::Terminated;
        self.terminated.store(true, Ordering::SeqCst);
    }
}

type SpecFn = dyn Fn(EngineSlot, u32) -> Option<StubSpec> + Send + Sync;

/// Factory handing out scripted engines. `make(slot, nth_spawn_for_slot)` returning
/// `None` makes that spawn fail as if the executable were missing.
pub struct StubFactory {
    make: Box<SpecFn>,
    spawned: Mutex<Vec<(EngineSlot, Arc<AtomicBool>)>>,
    spawn_counts: [AtomicU32; 2],
}

impl StubFactory {
    pub fn new(make: impl Fn(EngineSlot, u32) -> Option<StubSpec> + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            spawned: Mutex::new(Vec::new()),
            spawn_counts: [AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    /// Both slots use the same spec
    pub fn uniform(spec: StubSpec) -> Self {
        Self::new(move |_, _| Some(spec.clone()))
    }

    pub fn spawn_count(&self, slot: EngineSlot) -> u32 {
        self.spawn_counts[slot_index(slot)].load(Ordering::SeqCst)
    }

    pub fn all_terminated(&self) -> bool {
        self.spawned.lock().unwrap().iter().all(|(_, flag)| flag.load(Ordering::SeqCst))
    }

    pub fn total_spawned(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

fn slot_index(slot: EngineSlot) -> usize {
    match slot {
        EngineSlot::A => 0,
        EngineSlot::B => 1,
    }
}

impl EngineFactory for StubFactory {
    fn spawn(&self, slot: EngineSlot) -> Result<Box<dyn Engine>, EngineError> {
        let nth = self.spawn_counts[slot_index(slot)].fetch_add(1, Ordering::SeqCst);
        let label = format!("stub-{}{}", if slot == EngineSlot::A { "a" } else { "b" }, nth);
        let Some(spec) = (self.make)(slot, nth) else {
            return Err(EngineError::Unavailable {
                label,
                reason: "no such executable".to_string(),
            });
        };
        let (engine, flag) = ScriptedEngine::new(&label, spec);
        self.spawned.lock().unwrap().push((slot, flag));
        Ok(Box::new(engine))
    }
}

/// Deterministic config writing into `dir`
pub fn test_config(dir: &Path) -> SelfplayConfig {
    let mut config = SelfplayConfig::default();
    config.engine_a.path = "stub-a".into();
    config.engine_b.path = "stub-b".into();
    config.games = 1;
    config.move_time_ms = 1;
    config.opening_plies = 0;
    config.opening_time_ms = 1;
    config.timeout_grace_ms = 10;
    config.dataset = dir.join("dataset.txt");
    config.seed = Some(1);
    config
}

/// Parse `<fen> | <score> | <label>` lines
pub fn read_dataset(path: &Path) -> Vec<(String, i32, String)> {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    text.lines()
        .map(|line| {
            let parts: Vec<&str> = line.split(" | ").collect();
            assert_eq!(parts.len(), 3, "malformed line: {line}");
            (parts[0].to_string(), parts[1].parse().unwrap(), parts[2].to_string())
        })
        .collect()
}
