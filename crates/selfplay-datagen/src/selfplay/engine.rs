use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use super::config::EngineConfig;
use super::error::EngineError;
use super::options::{EngineOption, MULTI_PV, OptionValue};
use super::types::{
    CandidateMove, EngineSlot, InfoLine, SearchOutcome, SessionState, duration_to_millis,
    parse_info_line,
};

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 対局を進めるために必要なエンジン操作。
///
/// 実プロセス (`EngineProcess`) のほか、テストではスクリプト化したエンジンを差し込む。
pub trait Engine: Send {
    fn label(&self) -> &str;

    fn state(&self) -> SessionState;

    /// `ucinewgame` + `isready`
    fn new_game(&mut self) -> Result<(), EngineError>;

    /// `start_fen` が `None` なら平手初期局面から `moves` を適用した局面。
    fn set_position(&mut self, start_fen: Option<&str>, moves: &[String])
    -> Result<(), EngineError>;

    fn request_move(&mut self, budget: Duration) -> Result<SearchOutcome, EngineError>;

    /// 上位 `breadth` 手の候補を PV 順位順に返す。PV が 1 本も来なければ空。
    fn request_analysis(
        &mut self,
        budget: Duration,
        breadth: u32,
    ) -> Result<Vec<CandidateMove>, EngineError>;

    /// プロセスを終了させる。何度呼んでもよい。
    fn terminate(&mut self);
}

/// スロット (A/B) ごとにエンジンを生成する。対局中に落ちたエンジンの差し替えにも使う。
pub trait EngineFactory: Send + Sync {
    fn spawn(&self, slot: EngineSlot) -> Result<Box<dyn Engine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn(EngineSlot) -> Result<Box<dyn Engine>, EngineError> + Send + Sync,
{
    fn spawn(&self, slot: EngineSlot) -> Result<Box<dyn Engine>, EngineError> {
        self(slot)
    }
}

/// 設定ファイル / CLI で指定された実行ファイルを起動するファクトリ
pub struct ProcessEngineFactory {
    engine_a: EngineConfig,
    engine_b: EngineConfig,
    grace: Duration,
}

impl ProcessEngineFactory {
    pub fn new(engine_a: EngineConfig, engine_b: EngineConfig, grace: Duration) -> Self {
        Self {
            engine_a,
            engine_b,
            grace,
        }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn spawn(&self, slot: EngineSlot) -> Result<Box<dyn Engine>, EngineError> {
        let cfg = match slot {
            EngineSlot::A => &self.engine_a,
            EngineSlot::B => &self.engine_b,
        };
        Ok(Box::new(EngineProcess::spawn(cfg, self.grace)?))
    }
}

/// 1本のエンジンに対する入出力をカプセル化する。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    /// 小文字化した名前 → エンジンが広告した綴り
    opt_names: BTreeMap<String, String>,
    label: String,
    grace: Duration,
    /// `uciok` / `readyok` までの待ち時間（やり取り全体に対する上限）
    ready_timeout: Duration,
    state: SessionState,
    closed: bool,
}

impl EngineProcess {
    pub fn spawn(cfg: &EngineConfig, grace: Duration) -> Result<Self, EngineError> {
        Self::spawn_with_ready_timeout(cfg, grace, ENGINE_READY_TIMEOUT)
    }

    pub fn spawn_with_ready_timeout(
        cfg: &EngineConfig,
        grace: Duration,
        ready_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let label = cfg.label.clone();
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Unavailable {
                label: label.clone(),
                reason: format!("failed to spawn {}: {e}", cfg.path.display()),
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Unavailable {
                label,
                reason: "stdio pipes are not available".to_string(),
            });
        };
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut proc = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: BTreeMap::new(),
            label,
            grace,
            ready_timeout,
            state: SessionState::Busy,
            closed: false,
        };
        // 失敗時は Drop でプロセスを回収する
        proc.initialize(cfg).map_err(|e| match e {
            EngineError::Unavailable { .. } => e,
            other => EngineError::Unavailable {
                label: proc.label.clone(),
                reason: other.to_string(),
            },
        })?;
        proc.state = SessionState::Ready;
        Ok(proc)
    }

    fn initialize(&mut self, cfg: &EngineConfig) -> Result<(), EngineError> {
        self.write_line("uci")?;
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let line = self.recv_handshake_line("uciok", deadline)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name.to_ascii_lowercase(), name);
                }
            } else if line.trim() == "uciok" {
                break;
            }
        }
        for opt in cfg.options.iter() {
            self.set_option_if_available(opt)?;
        }
        self.sync_ready()?;
        self.write_line("ucinewgame")?;
        log::debug!(
            "{}: ready ({} options advertised, applied [{}])",
            self.label,
            self.opt_names.len(),
            cfg.options.describe().join(", ")
        );
        Ok(())
    }

    /// `deadline` までに1行受け取る。途中で何行来ても期限は延びない。
    fn recv_handshake_line(&self, waiting_for: &str, deadline: Instant) -> Result<String, EngineError> {
        let timed_out = || EngineError::Unavailable {
            label: self.label.clone(),
            reason: format!(
                "no '{waiting_for}' within {}ms",
                duration_to_millis(self.ready_timeout)
            ),
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        match self.rx.recv_timeout(remaining) {
            Ok(line) => {
                log::trace!("{} > {}", self.label, line);
                Ok(line)
            }
            Err(RecvTimeoutError::Timeout) => Err(timed_out()),
            Err(RecvTimeoutError::Disconnected) => Err(self.terminated()),
        }
    }

    pub fn sync_ready(&mut self) -> Result<(), EngineError> {
        self.write_line("isready")?;
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let line = self.recv_handshake_line("readyok", deadline)?;
            if line.trim() == "readyok" {
                break;
            }
        }
        Ok(())
    }

    /// エンジンが広告したオプションだけを送る。広告されていなければ警告してスキップ。
    pub fn set_option_if_available(&mut self, opt: &EngineOption) -> Result<(), EngineError> {
        let Some(name) = self.opt_names.get(&opt.name.to_ascii_lowercase()).cloned() else {
            log::warn!("{}: option '{}' is not supported, skipped", self.label, opt.name);
            return Ok(());
        };
        // 送る名前はエンジンが広告した綴りに合わせる
        let command = EngineOption {
            name,
            value: opt.value.clone(),
        }
        .setoption_command();
        self.write_line(&command)
    }

    pub fn supports_option(&self, name: &str) -> bool {
        self.opt_names.contains_key(&name.to_ascii_lowercase())
    }

    pub fn write_line(&mut self, msg: &str) -> Result<(), EngineError> {
        log::trace!("{} < {}", self.label, msg);
        let result = self
            .stdin
            .write_all(msg.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush());
        result.map_err(|_| self.terminated())
    }

    fn terminated(&self) -> EngineError {
        EngineError::Terminated {
            label: self.label.clone(),
        }
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.closed { Err(self.terminated()) } else { Ok(()) }
    }

    /// `go movetime` を送り `bestmove` まで読む。info 行は `on_info` に渡す。
    ///
    /// `budget + grace` で `stop` を送り、さらに `grace` 待っても来なければタイムアウト。
    fn run_search(
        &mut self,
        budget: Duration,
        mut on_info: impl FnMut(InfoLine),
    ) -> Result<(Option<String>, u64), EngineError> {
        self.ensure_alive()?;
        self.write_line(&format!("go movetime {}", duration_to_millis(budget).max(1)))?;
        self.state = SessionState::Busy;

        let start = Instant::now();
        let soft_limit = budget + self.grace;
        let hard_limit = soft_limit + self.grace;
        let mut stop_sent = false;

        loop {
            let elapsed = start.elapsed();
            let deadline = if stop_sent { hard_limit } else { soft_limit };
            if elapsed >= deadline {
                if !stop_sent {
                    self.write_line("stop")?;
                    stop_sent = true;
                    continue;
                }
                // 応答しないエンジンは以後使わない
                self.terminate();
                return Err(EngineError::Timeout {
                    label: self.label.clone(),
                    waited_ms: duration_to_millis(elapsed),
                });
            }

            match self.rx.recv_timeout(deadline.saturating_sub(elapsed)) {
                Ok(line) => {
                    log::trace!("{} > {}", self.label, line);
                    if let Some(info) = parse_info_line(&line) {
                        on_info(info);
                        continue;
                    }
                    if let Some(rest) = line.strip_prefix("bestmove") {
                        self.state = SessionState::Ready;
                        let elapsed_ms = duration_to_millis(start.elapsed());
                        return Ok((parse_bestmove(rest), elapsed_ms));
                    }
                }
                // 次の周回で stop 送信 / タイムアウト判定
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(self.terminated()),
            }
        }
    }
}

impl Engine for EngineProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn new_game(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.write_line("ucinewgame")?;
        let result = self.sync_ready();
        match result {
            // 対局中の応答なしは Timeout として扱う
            Err(EngineError::Unavailable { label, .. }) => {
                self.terminate();
                Err(EngineError::Timeout {
                    label,
                    waited_ms: duration_to_millis(self.ready_timeout),
                })
            }
            other => other,
        }
    }

    fn set_position(
        &mut self,
        start_fen: Option<&str>,
        moves: &[String],
    ) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.write_line(&position_command(start_fen, moves))
    }

    fn request_move(&mut self, budget: Duration) -> Result<SearchOutcome, EngineError> {
        let mut score = None;
        let (bestmove, elapsed_ms) = self.run_search(budget, |info| {
            if info.rank() == 1 && info.score.is_some() {
                score = info.score;
            }
        })?;
        Ok(SearchOutcome {
            bestmove,
            elapsed_ms,
            score,
        })
    }

    fn request_analysis(
        &mut self,
        budget: Duration,
        breadth: u32,
    ) -> Result<Vec<CandidateMove>, EngineError> {
        self.ensure_alive()?;
        let multipv = self.supports_option(MULTI_PV);
        if multipv {
            self.write_line(&multipv_option(breadth).setoption_command())?;
        } else {
            log::debug!("{}: MultiPV is not advertised, analysing a single line", self.label);
        }

        // 同じ順位は最新（最深）の行で上書きする
        let mut lines: BTreeMap<u32, InfoLine> = BTreeMap::new();
        self.run_search(budget, |info| {
            if !info.pv.is_empty() && info.rank() <= breadth.max(1) {
                lines.insert(info.rank(), info);
            }
        })?;

        if multipv {
            self.write_line(&multipv_option(1).setoption_command())?;
        }

        Ok(lines
            .into_iter()
            .map(|(rank, info)| CandidateMove {
                mv: info.pv[0].clone(),
                rank,
                score: info.score,
                pv: info.pv,
            })
            .collect())
    }

    fn terminate(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        let mut exited = false;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                exited = true;
                break;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        if !exited {
            log::debug!("{}: did not exit after quit, killing", self.label);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.state = SessionState::Terminated;
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn multipv_option(lines: u32) -> EngineOption {
    EngineOption {
        name: MULTI_PV.to_string(),
        value: OptionValue::Int(i64::from(lines.max(1))),
    }
}

pub fn position_command(start_fen: Option<&str>, moves: &[String]) -> String {
    let mut cmd = match start_fen {
        Some(fen) => format!("position fen {fen}"),
        None => "position startpos".to_string(),
    };
    if !moves.is_empty() {
        cmd.push_str(" moves ");
        cmd.push_str(&moves.join(" "));
    }
    cmd
}

/// `bestmove` に続く部分から指し手を取り出す。null move は `None`。
pub fn parse_bestmove(rest: &str) -> Option<String> {
    match rest.split_whitespace().next() {
        None | Some("(none)") | Some("0000") | Some("none") => None,
        Some(mv) => Some(mv.to_string()),
    }
}

/// `option name <名前> type ...` から名前を取り出す（空白を含む名前に対応）。
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(part) = tokens.next_if(|next| *next != "type") {
                parts.push(part);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}
