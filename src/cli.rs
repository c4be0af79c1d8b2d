use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "DC motor parameter identification with a Physics-Informed Neural Network (PINN)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（simulate または train）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// DCモータをシミュレーションし、参照データを npz 形式で保存します
    Simulate {
        /// 出力する npz ファイル
        #[arg(long, default_value = "data/dc_simulation.npz")]
        output: PathBuf,
    },
    /// 参照データから PINN を学習し、物理定数を推定します
    Train {
        /// 参照データ (npz)
        #[arg(long, default_value = "data/dc_simulation.npz")]
        data: PathBuf,
        /// 図・ログ・モデルの出力先
        #[arg(long, default_value = "results")]
        out_dir: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let cli = Cli::try_parse_from(["dc-motor-pinn", "train"]).unwrap();
        match cli.command {
            Commands::Train { data, out_dir } => {
                assert_eq!(data, PathBuf::from("data/dc_simulation.npz"));
                assert_eq!(out_dir, PathBuf::from("results"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn simulate_accepts_output() {
        let cli =
            Cli::try_parse_from(["dc-motor-pinn", "simulate", "--output", "out.npz"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Simulate { output } if output == PathBuf::from("out.npz")
        ));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["dc-motor-pinn", "infer"]).is_err());
    }
}
