//! UCI エンジンオプションのスキーマと検証
//!
//! よく使うオプションは名前・値の型・範囲を持つ `OptionSpec` で定義し、
//! 設定読み込み時に検証する。スキーマにない名前はエンジン固有オプションとして
//! 文字列のまま通す（エンジンが広告していなければ送信時にスキップされる）。

use std::fmt;

use super::error::ConfigError;

/// オプション値の型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    Spin { min: i64, max: i64 },
    Check,
    Text,
}

/// 既知オプションの定義
#[derive(Clone, Copy, Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
}

/// Stockfish 系エンジンで一般的なオプション
pub const KNOWN_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "Threads",
        kind: OptionKind::Spin { min: 1, max: 1024 },
    },
    OptionSpec {
        name: "Hash",
        kind: OptionKind::Spin {
            min: 1,
            max: 33_554_432,
        },
    },
    OptionSpec {
        name: "MultiPV",
        kind: OptionKind::Spin { min: 1, max: 500 },
    },
    OptionSpec {
        name: "Skill Level",
        kind: OptionKind::Spin { min: 0, max: 20 },
    },
    OptionSpec {
        name: "UCI_LimitStrength",
        kind: OptionKind::Check,
    },
    OptionSpec {
        name: "UCI_Elo",
        kind: OptionKind::Spin { min: 0, max: 4000 },
    },
    OptionSpec {
        name: "Move Overhead",
        kind: OptionKind::Spin { min: 0, max: 5000 },
    },
    OptionSpec {
        name: "Ponder",
        kind: OptionKind::Check,
    },
    OptionSpec {
        name: "SyzygyPath",
        kind: OptionKind::Text,
    },
];

pub const SKILL_LEVEL: &str = "Skill Level";
pub const MULTI_PV: &str = "MultiPV";

pub fn find_spec(name: &str) -> Option<&'static OptionSpec> {
    KNOWN_OPTIONS.iter().find(|spec| spec.name.eq_ignore_ascii_case(name))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::Text(v) => f.write_str(v),
        }
    }
}

/// 検証済みの 1 オプション
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOption {
    pub name: String,
    pub value: OptionValue,
}

impl EngineOption {
    /// `Name=Value` 形式をパースする。
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (name, value) =
            raw.split_once('=').ok_or_else(|| ConfigError::OptionSyntax(raw.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::OptionSyntax(raw.to_string()));
        }
        Self::from_text(name, value.trim())
    }

    /// 名前と文字列値から生成し、既知オプションなら型と範囲を検証する。
    pub fn from_text(name: &str, value: &str) -> Result<Self, ConfigError> {
        let Some(spec) = find_spec(name) else {
            return Ok(Self {
                name: name.to_string(),
                value: OptionValue::Text(value.to_string()),
            });
        };
        let value = match spec.kind {
            OptionKind::Spin { min, max } => {
                let v = value.parse::<i64>().map_err(|_| ConfigError::OptionValue {
                    name: spec.name.to_string(),
                    reason: format!("expected an integer, got '{value}'"),
                })?;
                if !(min..=max).contains(&v) {
                    return Err(ConfigError::OptionValue {
                        name: spec.name.to_string(),
                        reason: format!("{v} is outside {min}..={max}"),
                    });
                }
                OptionValue::Int(v)
            }
            OptionKind::Check => match value.to_ascii_lowercase().as_str() {
                "true" | "1" => OptionValue::Bool(true),
                "false" | "0" => OptionValue::Bool(false),
                _ => {
                    return Err(ConfigError::OptionValue {
                        name: spec.name.to_string(),
                        reason: format!("expected true/false, got '{value}'"),
                    });
                }
            },
            OptionKind::Text => OptionValue::Text(value.to_string()),
        };
        // 既知オプションは正規の綴りに揃える
        Ok(Self {
            name: spec.name.to_string(),
            value,
        })
    }

    /// TOML の値から生成する（`Threads = 2` / `Ponder = false` / `SyzygyPath = "..."`）。
    pub fn from_toml(name: &str, value: &toml::Value) -> Result<Self, ConfigError> {
        let text = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(ConfigError::OptionValue {
                    name: name.to_string(),
                    reason: format!("unsupported value type: {}", other.type_str()),
                });
            }
        };
        Self::from_text(name, &text)
    }

    pub fn setoption_command(&self) -> String {
        format!("setoption name {} value {}", self.name, self.value)
    }
}

/// 1 エンジン分のオプション列。同名は後勝ち。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineOptions {
    entries: Vec<EngineOption>,
}

impl EngineOptions {
    pub fn parse_list<S: AsRef<str>>(raw: &[S]) -> Result<Self, ConfigError> {
        let mut opts = Self::default();
        for item in raw {
            opts.set(EngineOption::parse(item.as_ref())?);
        }
        Ok(opts)
    }

    pub fn set(&mut self, option: EngineOption) {
        if let Some(existing) =
            self.entries.iter_mut().find(|o| o.name.eq_ignore_ascii_case(&option.name))
        {
            *existing = option;
        } else {
            self.entries.push(option);
        }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|o| o.name.eq_ignore_ascii_case(name)).map(|o| &o.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineOption> {
        self.entries.iter()
    }

    /// ログ / 棋譜メタ用の `Name=Value` 表現
    pub fn describe(&self) -> Vec<String> {
        self.entries.iter().map(|o| format!("{}={}", o.name, o.value)).collect()
    }
}
