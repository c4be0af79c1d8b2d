//! # DCモータの物理定数同定 (PINN)
//!
//! `burn` フレームワークを使用して、物理情報ニューラルネットワーク（PINN）を構築し、
//! DCモータの観測データから6つの物理定数 (J, b, Kt, L, R, Ke) を推定するための
//! 主要なコンポーネントを提供します。

pub mod backend;
pub mod cli;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod derivative;
pub mod error;
pub mod model;
pub mod pinn;
pub mod report;
pub mod simulation;
pub mod training;

pub use error::{PinnError, PinnResult};

/// モデルを保存するファイル名 (拡張子はレコーダーが付与します)
pub const MODEL_FILENAME: &str = "pinn_model";
