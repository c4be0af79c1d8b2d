//! 実験の制御変数。
//!
//! すべての値はコンパイル時の既定値として持ち、起動時に一度だけ検証します。

use burn::config::Config;

use crate::error::{PinnError, PinnResult};
use crate::model::NetworkConfig;

/// 推定対象となる6つの物理定数の名前 (記録・描画の順序)。
pub const CONSTANT_NAMES: [&str; 6] = ["J", "b", "Kt", "L", "R", "Ke"];

/// DCモータの公称パラメータ (真値)。
#[derive(Config, Debug)]
pub struct MotorParameters {
    /// 慣性モーメント J
    #[config(default = 0.1)]
    pub inertia: f32,
    /// 粘性摩擦係数 b
    #[config(default = 0.5)]
    pub damping: f32,
    /// トルク定数 Kt
    #[config(default = 1.0)]
    pub torque_constant: f32,
    /// インダクタンス L
    #[config(default = 1.0)]
    pub inductance: f32,
    /// 抵抗 R
    #[config(default = 5.0)]
    pub resistance: f32,
    /// 逆起電力定数 Ke
    #[config(default = 1.0)]
    pub back_emf: f32,
}

impl MotorParameters {
    /// `CONSTANT_NAMES` と同じ順序で値を返します。
    pub fn as_array(&self) -> [f32; 6] {
        [
            self.inertia,
            self.damping,
            self.torque_constant,
            self.inductance,
            self.resistance,
            self.back_emf,
        ]
    }
}

/// 参照データを生成するシミュレーションの設定。
#[derive(Config, Debug)]
pub struct SimulationConfig {
    /// 積分刻み幅 [s]
    #[config(default = 1e-3)]
    pub dt: f64,
    /// 時間範囲 [s]
    #[config(default = 5.0)]
    pub t_final: f64,
    /// 外乱トルクの強度
    #[config(default = 1e-3)]
    pub dist_intensity: f64,
    /// 矩形波入力電圧の振幅 [V]
    #[config(default = 1.0)]
    pub voltage_amplitude: f64,
    /// 矩形波入力電圧の周期 [s]
    #[config(default = 2.0)]
    pub voltage_period: f64,
    #[config(default = 7)]
    pub seed: u64,
}

/// 観測点・コロケーション点・検証点のサンプリング設定。
#[derive(Config, Debug)]
pub struct SamplingConfig {
    /// 物理損失を評価するコロケーション点の数
    #[config(default = 1000)]
    pub n_training: usize,
    /// コロケーション点数に対する観測点数の比
    #[config(default = 1.2)]
    pub data_ratio: f64,
    /// 検証点 (および予測曲線) の点数
    #[config(default = 4000)]
    pub n_validation: usize,
    /// 観測値に加える正規ノイズの標準偏差
    #[config(default = 0.0)]
    pub noise: f32,
}

impl SamplingConfig {
    /// 観測点の数 `round(data_ratio * n_training)`。
    pub fn n_data(&self) -> usize {
        (self.data_ratio * self.n_training as f64).round() as usize
    }
}

/// 初期推定値の摂動幅。値は公称値に対する比率です。
#[derive(Config, Debug)]
pub struct GuessBounds {
    #[config(default = 1.5)]
    pub infe: f32,
    #[config(default = 1.5)]
    pub supe: f32,
}

/// 1回の同定実験を決めるすべての制御変数。
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    #[config(default = "NetworkConfig::new()")]
    pub network: NetworkConfig,
    #[config(default = "MotorParameters::new()")]
    pub motor: MotorParameters,
    #[config(default = "SimulationConfig::new()")]
    pub simulation: SimulationConfig,
    #[config(default = "SamplingConfig::new()")]
    pub sampling: SamplingConfig,
    #[config(default = "GuessBounds::new()")]
    pub guess: GuessBounds,
    /// 学習の反復回数 (早期終了なし)
    #[config(default = 200)]
    pub iterations: usize,
    /// データ損失の重み λ
    #[config(default = 100.0)]
    pub lambda: f32,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Adam の分母に加える ε
    #[config(default = 1e-8)]
    pub adam_epsilon: f32,
    /// スナップショットを保存する間隔
    #[config(default = 99)]
    pub plot_stride: usize,
    /// GIFアニメーションのフレームレート
    #[config(default = 60)]
    pub gif_fps: u32,
    /// 定数の初期推定値の乱数シード
    #[config(default = 0)]
    pub guess_seed: u64,
    /// 観測点の抽出とノイズの乱数シード
    #[config(default = 1)]
    pub sampling_seed: u64,
    /// ネットワーク重み初期化の乱数シード
    #[config(default = 123)]
    pub network_seed: u64,
}

impl ExperimentConfig {
    /// 参照データの行数 `dataset_len` に対して設定を検証します。
    pub fn validate(&self, dataset_len: usize) -> PinnResult<()> {
        let sampling = &self.sampling;
        if dataset_len == 0 {
            return Err(PinnError::Config("参照データが空です".into()));
        }
        if self.iterations == 0 {
            return Err(PinnError::Config("iterations は1以上が必要です".into()));
        }
        if self.plot_stride == 0 {
            return Err(PinnError::Config("plot_stride は1以上が必要です".into()));
        }
        if self.gif_fps == 0 {
            return Err(PinnError::Config("gif_fps は1以上が必要です".into()));
        }
        if sampling.n_training == 0 || sampling.n_validation == 0 {
            return Err(PinnError::Config(
                "n_training と n_validation は1以上が必要です".into(),
            ));
        }
        if sampling.n_training > dataset_len || sampling.n_validation > dataset_len {
            return Err(PinnError::Config(format!(
                "n_training ({}) と n_validation ({}) はデータ行数 {dataset_len} 以下が必要です",
                sampling.n_training, sampling.n_validation
            )));
        }
        let n_data = sampling.n_data();
        if n_data == 0 || n_data > dataset_len {
            return Err(PinnError::Config(format!(
                "観測点数 {n_data} はデータ行数 {dataset_len} 以下の正の値が必要です"
            )));
        }
        if !(sampling.noise.is_finite() && sampling.noise >= 0.0) {
            return Err(PinnError::Config("noise は0以上の有限値が必要です".into()));
        }
        if self.network.hidden == 0 || self.network.layers == 0 {
            return Err(PinnError::Config(
                "hidden と layers は1以上が必要です".into(),
            ));
        }
        if self.network.input != 1 || self.network.output != 2 {
            return Err(PinnError::Config(
                "ネットワークは時刻1入力・(速度, 電流)2出力である必要があります".into(),
            ));
        }
        if !self.motor.as_array().iter().all(|v| v.is_finite()) {
            return Err(PinnError::Config("物理定数の公称値が有限ではありません".into()));
        }
        if !(self.guess.infe.is_finite() && self.guess.supe.is_finite()) {
            return Err(PinnError::Config("摂動幅が有限ではありません".into()));
        }
        if !(self.lambda.is_finite()
            && self.learning_rate.is_finite()
            && self.learning_rate > 0.0
            && self.adam_epsilon.is_finite()
            && self.adam_epsilon > 0.0)
        {
            return Err(PinnError::Config("lambda, learning_rate, adam_epsilon が不正です".into()));
        }
        if !(self.simulation.t_final > 0.0) {
            return Err(PinnError::Config("t_final は正の値が必要です".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_experiment() {
        let config = ExperimentConfig::new();
        assert_eq!(config.sampling.n_training, 1000);
        assert_eq!(config.sampling.n_data(), 1200);
        assert_eq!(config.iterations, 200);
        assert_eq!(config.lambda, 100.0);
        assert_eq!(config.plot_stride, 99);
        assert_eq!(config.motor.as_array(), [0.1, 0.5, 1.0, 1.0, 5.0, 1.0]);
        assert!(config.validate(5001).is_ok());
    }

    #[test]
    fn small_scenario_counts() {
        let sampling = SamplingConfig::new().with_n_training(10);
        assert_eq!(sampling.n_data(), 12);
    }

    #[test]
    fn rejects_more_observations_than_rows() {
        let config = ExperimentConfig::new();
        assert!(matches!(config.validate(100), Err(PinnError::Config(_))));
    }

    #[test]
    fn rejects_more_collocation_points_than_rows() {
        // 観測点数は少なくても、コロケーション点数だけで行数を超える場合
        let config = ExperimentConfig::new().with_sampling(
            SamplingConfig::new()
                .with_n_training(1000)
                .with_data_ratio(0.1)
                .with_n_validation(100),
        );
        assert_eq!(config.sampling.n_data(), 100);
        assert!(matches!(config.validate(501), Err(PinnError::Config(_))));
        assert!(config.validate(1000).is_ok());
    }

    #[test]
    fn rejects_more_validation_points_than_rows() {
        let config = ExperimentConfig::new()
            .with_sampling(SamplingConfig::new().with_n_training(10).with_n_validation(600));
        assert!(matches!(config.validate(501), Err(PinnError::Config(_))));
    }

    #[test]
    fn adam_epsilon_default_is_small() {
        let config = ExperimentConfig::new();
        assert_eq!(config.adam_epsilon, 1e-8);
        assert!(config.with_adam_epsilon(0.0).validate(5001).is_err());
    }

    #[test]
    fn rejects_zero_stride() {
        let config = ExperimentConfig::new().with_plot_stride(0);
        assert!(config.validate(5001).is_err());
    }
}
