//! UCI のやり取りを実プロセスで確認する（`sh` で書いた最小エンジンを使う）
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use selfplay_datagen::selfplay::{
    Engine, EngineConfig, EngineError, EngineOption, EngineOptions, EngineProcess, Score,
    SessionState,
};

const RESPONSIVE: &str = r#"
while read -r line; do
  case "$line" in
    uci)
      echo "id name stub"
      echo "option name Threads type spin default 1 min 1 max 8"
      echo "option name MultiPV type spin default 1 min 1 max 10"
      echo "uciok" ;;
    isready) echo "readyok" ;;
    go*)
      echo "info depth 1 multipv 1 score cp 12 pv e2e4 e7e5"
      echo "info depth 1 multipv 2 score cp 5 pv d2d4 d7d5"
      echo "bestmove e2e4 ponder e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;

const SILENT_ON_GO: &str = r#"
while read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    quit) exit 0 ;;
  esac
done
"#;

const NEVER_READY: &str = r#"
while true; do
  echo "info string still booting"
  sleep 0.1
done
"#;

const EXITS_ON_GO: &str = r#"
while read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) exit 1 ;;
  esac
done
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn sh_engine(script: &Path, options: EngineOptions) -> EngineConfig {
    EngineConfig {
        path: PathBuf::from("sh"),
        args: vec![script.to_string_lossy().into_owned()],
        label: "stub".to_string(),
        options,
    }
}

fn spawn(script: &Path) -> EngineProcess {
    EngineProcess::spawn(&sh_engine(script, EngineOptions::default()), Duration::from_millis(200))
        .unwrap()
}

#[test]
fn handshake_and_move_request() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "engine.sh", RESPONSIVE);
    // Hash は広告されていないので送らずに起動できる
    let options = EngineOptions::parse_list(&["Threads=2", "Hash=64"]).unwrap();
    let mut engine =
        EngineProcess::spawn(&sh_engine(&script, options), Duration::from_millis(200)).unwrap();
    assert_eq!(engine.state(), SessionState::Ready);
    assert!(engine.supports_option("multipv"));
    assert!(!engine.supports_option("Hash"));

    engine.new_game().unwrap();
    engine.set_position(None, &["e2e4".to_string()]).unwrap();
    let outcome = engine.request_move(Duration::from_millis(10)).unwrap();
    assert_eq!(outcome.bestmove.as_deref(), Some("e2e4"));
    assert_eq!(outcome.score, Some(Score::Cp(12)));
    assert_eq!(engine.state(), SessionState::Ready);
}

#[test]
fn analysis_returns_candidates_in_rank_order() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "engine.sh", RESPONSIVE);
    let mut engine = spawn(&script);

    let candidates = engine.request_analysis(Duration::from_millis(10), 5).unwrap();
    let moves: Vec<(&str, u32)> = candidates.iter().map(|c| (c.mv.as_str(), c.rank)).collect();
    assert_eq!(moves, vec![("e2e4", 1), ("d2d4", 2)]);
    assert_eq!(candidates[1].score, Some(Score::Cp(5)));
    assert_eq!(candidates[1].pv, vec!["d2d4".to_string(), "d7d5".to_string()]);

    let narrow = engine.request_analysis(Duration::from_millis(10), 1).unwrap();
    assert_eq!(narrow.len(), 1);
    assert_eq!(narrow[0].mv, "e2e4");
}

#[test]
fn terminate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "engine.sh", RESPONSIVE);
    let mut engine = spawn(&script);

    engine.terminate();
    engine.terminate();
    assert_eq!(engine.state(), SessionState::Terminated);
    assert!(matches!(
        engine.request_move(Duration::from_millis(10)),
        Err(EngineError::Terminated { .. })
    ));
}

#[test]
fn silent_engine_times_out_and_is_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "silent.sh", SILENT_ON_GO);
    let mut engine =
        EngineProcess::spawn(&sh_engine(&script, EngineOptions::default()), Duration::from_millis(50))
            .unwrap();

    let err = engine.request_move(Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, EngineError::Timeout { .. }));
    assert_eq!(engine.state(), SessionState::Terminated);
    assert!(matches!(
        engine.request_move(Duration::from_millis(10)),
        Err(EngineError::Terminated { .. })
    ));
}

#[test]
fn engine_exiting_mid_search_is_reported_as_terminated() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "crash.sh", EXITS_ON_GO);
    let mut engine = spawn(&script);

    let err = engine.request_move(Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, EngineError::Terminated { .. }));
    assert_eq!(err.label(), "stub");
}

#[test]
fn handshake_deadline_covers_the_whole_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "chatty.sh", NEVER_READY);
    let cfg = sh_engine(&script, EngineOptions::default());

    let start = Instant::now();
    let result = EngineProcess::spawn_with_ready_timeout(
        &cfg,
        Duration::from_millis(50),
        Duration::from_millis(500),
    );
    // 行が届き続けても期限は延びない
    assert!(start.elapsed() < Duration::from_secs(5));
    match result {
        Err(EngineError::Unavailable { label, reason }) => {
            assert_eq!(label, "stub");
            assert!(reason.contains("uciok"), "{reason}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should not complete"),
    }
}

#[test]
fn missing_executable_is_unavailable() {
    let cfg = EngineConfig {
        path: PathBuf::from("/nonexistent/chess-engine"),
        args: Vec::new(),
        label: "ghost".to_string(),
        options: EngineOptions::default(),
    };
    match EngineProcess::spawn(&cfg, Duration::from_millis(50)) {
        Err(EngineError::Unavailable { label, .. }) => assert_eq!(label, "ghost"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("spawn should fail"),
    }
}

#[test]
fn option_values_are_validated_before_spawning() {
    assert!(EngineOption::parse("Threads=0").is_err());
    assert!(EngineOption::parse("Threads").is_err());
    assert_eq!(EngineOption::parse("threads=4").unwrap().setoption_command(), "setoption name Threads value 4");
}
