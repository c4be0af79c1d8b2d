//! # DCモータの物理定数同定 (PINN)
//!
//! 矩形波電圧で駆動した DCモータの速度・電流の観測から、PINN を使って
//! 物理定数を推定するプログラムです。
//!
//! `clap` クレートを利用して、コマンドラインから`simulate`（参照データ生成）と
//! `train`（学習）の機能を個別に実行できます。
//!
//! ## 使い方
//!
//! ### 参照データの生成
//! ```bash
//! cargo run --release -- simulate --output data/dc_simulation.npz
//! ```
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --data data/dc_simulation.npz --out-dir results
//! ```
//!
//! ログの詳細度は `RUST_LOG` で変更できます (既定は `info`)。

use clap::Parser;
use dc_motor_pinn::cli::{Cli, Commands};
use dc_motor_pinn::{simulation, training};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate { output } => simulation::run(&output)?,
        Commands::Train { data, out_dir } => training::run(&data, &out_dir)?,
    }
    Ok(())
}
