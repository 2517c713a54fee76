//! 自己対局の実行設定
//!
//! TOML ファイルから読み込めるほか、CLI 側で個々の値を上書きする。
//! エンジン起動前に `validate` / `engine_config` で検証し、不正な設定は
//! ここで失敗させる。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::options::{EngineOption, EngineOptions, OptionValue, SKILL_LEVEL};
use super::types::EngineSlot;

/// 設定ファイル中の 1 エンジン分のセクション
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub label: Option<String>,
    /// `Threads = 2`, `"Skill Level" = 5` など
    pub options: BTreeMap<String, toml::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelfplayConfig {
    /// 学習させたい側のエンジン
    pub engine_a: EngineSection,
    /// 参照側のエンジン（強さ制限と序盤ガイドを担当）
    pub engine_b: EngineSection,
    pub games: u32,
    pub move_time_ms: u64,
    pub opening_plies: u32,
    /// 序盤解析で要求する候補手数（MultiPV）
    pub analysis_breadth: u32,
    pub opening_time_ms: u64,
    pub opening_guide: EngineSlot,
    /// engine_b に送る `Skill Level`
    pub skill_level: Option<u8>,
    /// 1局あたりの記録局面数の上限。到達したら引き分けとして終局する。
    pub max_plies: u32,
    /// 思考時間を超えてから stop / タイムアウト判定までの猶予
    pub timeout_grace_ms: u64,
    pub dataset: PathBuf,
    pub transcript: Option<PathBuf>,
    pub startpos_file: Option<PathBuf>,
    pub seed: Option<u64>,
    pub concurrency: usize,
    /// 指したエンジンの評価値（白視点）をスコア欄に記録する
    pub record_engine_score: bool,
}

impl Default for SelfplayConfig {
    fn default() -> Self {
        Self {
            engine_a: EngineSection::default(),
            engine_b: EngineSection::default(),
            games: 64,
            move_time_ms: 50,
            opening_plies: 8,
            analysis_breadth: 15,
            opening_time_ms: 100,
            opening_guide: EngineSlot::B,
            skill_level: Some(7),
            max_plies: 300,
            timeout_grace_ms: 1000,
            dataset: PathBuf::from("dataset_selfplay.txt"),
            transcript: None,
            startpos_file: None,
            seed: None,
            concurrency: 1,
            record_engine_score: false,
        }
    }
}

/// エンジンプロセス起動時の設定（検証済み）
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub label: String,
    pub options: EngineOptions,
}

impl SelfplayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let min_checks: [(&'static str, u64, u64); 6] = [
            ("games", u64::from(self.games), 1),
            ("move_time_ms", self.move_time_ms, 1),
            ("max_plies", u64::from(self.max_plies), 1),
            ("analysis_breadth", u64::from(self.analysis_breadth), 1),
            ("opening_time_ms", self.opening_time_ms, 1),
            ("concurrency", self.concurrency as u64, 1),
        ];
        for (field, value, min) in min_checks {
            if value < min {
                return Err(ConfigError::TooSmall { field, min });
            }
        }
        self.engine_config(EngineSlot::A)?;
        self.engine_config(EngineSlot::B)?;
        Ok(())
    }

    pub fn section(&self, slot: EngineSlot) -> &EngineSection {
        match slot {
            EngineSlot::A => &self.engine_a,
            EngineSlot::B => &self.engine_b,
        }
    }

    pub fn section_mut(&mut self, slot: EngineSlot) -> &mut EngineSection {
        match slot {
            EngineSlot::A => &mut self.engine_a,
            EngineSlot::B => &mut self.engine_b,
        }
    }

    /// スロットごとの起動設定を組み立てる。`skill_level` は engine_b にのみ適用。
    pub fn engine_config(&self, slot: EngineSlot) -> Result<EngineConfig, ConfigError> {
        let section = self.section(slot);
        let slot_name = match slot {
            EngineSlot::A => "engine_a",
            EngineSlot::B => "engine_b",
        };
        if section.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingEnginePath(slot_name));
        }
        let mut options = EngineOptions::default();
        for (name, value) in &section.options {
            options.set(EngineOption::from_toml(name, value)?);
        }
        if slot == EngineSlot::B {
            if let Some(level) = self.skill_level {
                options.set(EngineOption::from_text(SKILL_LEVEL, &level.to_string())?);
            }
        }
        let label = section.label.clone().unwrap_or_else(|| {
            let base = engine_label_from_path(&section.path);
            // 同一バイナリ同士でもラベルが衝突しないようにする
            if self.section(slot.other()).path == section.path
                && self.section(slot.other()).label.is_none()
            {
                format!("{base}-{}", slot_name.trim_start_matches("engine_"))
            } else {
                base
            }
        });
        Ok(EngineConfig {
            path: section.path.clone(),
            args: section.args.clone(),
            label,
            options,
        })
    }

    /// CLI の `Name=Value` 指定をセクションへ取り込む（検証は `engine_config` で行う）。
    pub fn push_cli_options(&mut self, slot: EngineSlot, raw: &[String]) -> Result<(), ConfigError> {
        let parsed = EngineOptions::parse_list(raw)?;
        let section = self.section_mut(slot);
        for opt in parsed.iter() {
            let value = match &opt.value {
                OptionValue::Int(v) => toml::Value::Integer(*v),
                OptionValue::Bool(v) => toml::Value::Boolean(*v),
                OptionValue::Text(v) => toml::Value::String(v.clone()),
            };
            section.options.insert(opt.name.clone(), value);
        }
        Ok(())
    }

    pub fn move_time(&self) -> Duration {
        Duration::from_millis(self.move_time_ms)
    }

    pub fn opening_time(&self) -> Duration {
        Duration::from_millis(self.opening_time_ms)
    }

    pub fn timeout_grace(&self) -> Duration {
        Duration::from_millis(self.timeout_grace_ms)
    }
}

pub fn engine_label_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("engine")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SelfplayConfig {
        let mut cfg = SelfplayConfig::default();
        cfg.engine_a.path = PathBuf::from("/opt/engines/mybot");
        cfg.engine_b.path = PathBuf::from("/usr/bin/stockfish");
        cfg
    }

    #[test]
    fn parses_toml_with_engine_options() {
        let cfg: SelfplayConfig = toml::from_str(
            r#"
            games = 10
            max_plies = 120
            opening_guide = "a"

            [engine_a]
            path = "./build/chess_engine"

            [engine_b]
            path = "stockfish"
            options = { Threads = 2, "Skill Level" = 3 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.games, 10);
        assert_eq!(cfg.max_plies, 120);
        assert_eq!(cfg.opening_guide, EngineSlot::A);
        // 未指定は既定値
        assert_eq!(cfg.opening_plies, 8);

        // skill_level (既定 7) がファイル側の Skill Level より優先される
        let b = cfg.engine_config(EngineSlot::B).unwrap();
        assert_eq!(b.label, "stockfish");
        assert_eq!(b.options.get("Threads"), Some(&OptionValue::Int(2)));
        assert_eq!(b.options.get("Skill Level"), Some(&OptionValue::Int(7)));

        let a = cfg.engine_config(EngineSlot::A).unwrap();
        assert_eq!(a.label, "chess_engine");
        assert!(a.options.get("Skill Level").is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = toml::from_str::<SelfplayConfig>("gmaes = 3").unwrap_err();
        assert!(err.to_string().contains("gmaes"));
    }

    #[test]
    fn validate_fails_fast_on_bad_values() {
        let mut cfg = base_config();
        cfg.max_plies = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooSmall {
                field: "max_plies",
                ..
            })
        ));

        let mut cfg = base_config();
        cfg.engine_b.path = PathBuf::new();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingEnginePath("engine_b"))));

        let mut cfg = base_config();
        cfg.engine_a.options.insert("Hash".to_string(), toml::Value::String("big".into()));
        assert!(matches!(cfg.validate(), Err(ConfigError::OptionValue { .. })));

        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn same_binary_gets_distinct_labels() {
        let mut cfg = base_config();
        cfg.engine_b.path = cfg.engine_a.path.clone();
        let a = cfg.engine_config(EngineSlot::A).unwrap();
        let b = cfg.engine_config(EngineSlot::B).unwrap();
        assert_eq!(a.label, "mybot-a");
        assert_eq!(b.label, "mybot-b");
    }

    #[test]
    fn cli_options_are_merged_into_section() {
        let mut cfg = base_config();
        cfg.push_cli_options(EngineSlot::A, &["Threads=3".to_string()]).unwrap();
        let a = cfg.engine_config(EngineSlot::A).unwrap();
        assert_eq!(a.options.get("Threads"), Some(&OptionValue::Int(3)));
        assert!(cfg.push_cli_options(EngineSlot::A, &["Threads".to_string()]).is_err());
    }
}
