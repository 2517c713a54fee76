//! チェスエンジン同士の自己対局から評価関数の学習データを生成する。
//!
//! 2つの UCI エンジンを子プロセスとして動かし、序盤を MultiPV 解析で多様化した
//! うえで対局させ、各局面に対局結果のラベルを付けて追記していく。

pub mod common;
pub mod selfplay;
