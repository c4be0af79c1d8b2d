use std::fs;
use std::path::Path;
use std::time::Instant;

use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::MODEL_FILENAME;
use crate::backend::{BACKEND_NAME, TrainingBackend, default_device};
use crate::config::{CONSTANT_NAMES, ExperimentConfig};
use crate::constants::{PhysicalConstants, perturbed_guess};
use crate::dataset::{
    CollocationSet, ObservationSet, Observed, ReferenceTrajectory, ValidationSet, column_tensor,
    host_values, linspace,
};
use crate::derivative::derivatives;
use crate::error::{PinnError, PinnResult};
use crate::model::Pinn;
use crate::pinn::{LossRecord, LossTerms, assemble, data_loss, electrical_residual, mechanical_residual};
use crate::report::PlotReporter;

/// 反復ごとの定数推定値と損失の記録。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryLog {
    /// `[J, b, Kt, L, R, Ke]` (その反復のステップ前の値)
    pub constants: Vec<[f32; 6]>,
    pub losses: Vec<LossRecord>,
}

impl TrajectoryLog {
    pub fn push(&mut self, constants: [f32; 6], losses: LossRecord) {
        self.constants.push(constants);
        self.losses.push(losses);
    }

    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }
}

/// 時間範囲全体にわたる密な予測曲線。
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionCurve {
    pub iteration: usize,
    pub times: Vec<f32>,
    pub velocity: Vec<f32>,
    pub current: Vec<f32>,
}

/// 学習ループから可視化・保存を受け持つ外部の協調者。
pub trait Reporter {
    /// `plot_stride` ごとのスナップショット。
    fn snapshot(&mut self, curve: &PredictionCurve, observed: &Observed) -> PinnResult<()>;

    /// 最初と最後の反復での、参照軌道との比較。
    fn comparison(&mut self, curve: &PredictionCurve, observed: &Observed) -> PinnResult<()>;

    /// 学習終了時の記録一式。
    fn finish(&mut self, log: &TrajectoryLog) -> PinnResult<()>;
}

/// 何も出力しない `Reporter`。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReport;

impl Reporter for NoReport {
    fn snapshot(&mut self, _: &PredictionCurve, _: &Observed) -> PinnResult<()> {
        Ok(())
    }

    fn comparison(&mut self, _: &PredictionCurve, _: &Observed) -> PinnResult<()> {
        Ok(())
    }

    fn finish(&mut self, _: &TrajectoryLog) -> PinnResult<()> {
        Ok(())
    }
}

/// 学習の結果。
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub pinn: Pinn<B>,
    pub log: TrajectoryLog,
}

/// 学習開始前に固定されるすべての入力。
#[derive(Debug, Clone)]
pub struct Experiment<B: AutodiffBackend> {
    config: ExperimentConfig,
    guess: [f32; 6],
    observations: ObservationSet<B>,
    collocation: CollocationSet<B>,
    validation: ValidationSet<B::InnerBackend>,
    dense_times: Vec<f32>,
    device: B::Device,
}

impl<B: AutodiffBackend> Experiment<B> {
    /// 設定を検証し、初期推定値と各サンプル集合を用意します。
    pub fn prepare(
        config: &ExperimentConfig,
        trajectory: &ReferenceTrajectory,
        device: &B::Device,
    ) -> PinnResult<Self> {
        config.validate(trajectory.len())?;

        let guess = perturbed_guess(
            &config.motor,
            &config.guess,
            &mut StdRng::seed_from_u64(config.guess_seed),
        );

        let sampling = &config.sampling;
        let mut rng = StdRng::seed_from_u64(config.sampling_seed);
        let observations =
            ObservationSet::sample(trajectory, sampling.n_data(), sampling.noise, &mut rng, device)?;
        let collocation = CollocationSet::evenly_spaced(trajectory, sampling.n_training, device);

        let horizon = config.simulation.t_final as f32;
        let validation =
            ValidationSet::over_horizon(trajectory, sampling.n_validation, horizon, device)?;
        let dense_times = linspace(0.0, horizon, sampling.n_validation);

        Ok(Self {
            config: config.clone(),
            guess,
            observations,
            collocation,
            validation,
            dense_times,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// 物理定数の初期推定値 `[J, b, Kt, L, R, Ke]`。
    pub fn guess(&self) -> [f32; 6] {
        self.guess
    }

    pub fn observations(&self) -> &ObservationSet<B> {
        &self.observations
    }

    pub fn collocation(&self) -> &CollocationSet<B> {
        &self.collocation
    }

    /// 初期状態のモデルを作ります。同じ実験からは常に同じモデルが得られます。
    pub fn initial_pinn(&self) -> Pinn<B> {
        let mut rng = StdRng::seed_from_u64(self.config.network_seed);
        let network = self.config.network.init(&self.device, &mut rng);
        let constants = PhysicalConstants::new(self.guess, &self.device);
        Pinn::new(network, constants)
    }

    /// 現在のモデルに対する損失の各項を組み立てます。
    pub fn losses(&self, pinn: &Pinn<B>) -> PinnResult<LossTerms<B>> {
        let collocation = &self.collocation;
        let d = derivatives(&pinn.network, collocation.times.clone())?;
        let mechanical = mechanical_residual(&pinn.constants, &d, collocation.disturbance.clone());
        let electrical = electrical_residual(&pinn.constants, &d, collocation.voltage.clone());

        let data = data_loss(
            pinn.forward(self.observations.times.clone()),
            self.observations.outputs.clone(),
        );
        // 検証誤差は計算グラフを作らずに内部バックエンドで評価する
        let validation = Tensor::from_inner(data_loss(
            pinn.valid().forward(self.validation.times.clone()),
            self.validation.outputs.clone(),
        ));

        Ok(assemble(
            mechanical,
            electrical,
            data,
            validation,
            self.config.lambda,
        ))
    }

    /// `[0, t_final]` 全体の密な予測曲線を求めます。
    pub fn dense_curve(&self, pinn: &Pinn<B>, iteration: usize) -> PinnResult<PredictionCurve> {
        let times = column_tensor::<B::InnerBackend>(self.dense_times.clone(), &self.device);
        let predictions = host_values(pinn.valid().forward(times))?;
        Ok(PredictionCurve {
            iteration,
            times: self.dense_times.clone(),
            velocity: predictions.iter().step_by(2).copied().collect(),
            current: predictions.iter().skip(1).step_by(2).copied().collect(),
        })
    }

    /// 固定回数の反復で、ネットワークの重みと物理定数を同時に学習します。
    pub fn run(self, reporter: &mut impl Reporter) -> PinnResult<TrainingOutcome<B>> {
        let config = &self.config;
        let iterations = config.iterations;
        let mut pinn = self.initial_pinn();
        let mut optim = adam(config).init();
        let mut log = TrajectoryLog::default();
        let mut warned = false;

        info!(
            iterations,
            n_training = self.collocation.len(),
            n_data = self.observations.len(),
            "学習を開始します (DCモータ) - バックエンド: {}",
            BACKEND_NAME
        );

        for i in 0..iterations {
            let terms = self.losses(&pinn)?;
            let record = terms.record();
            log.push(pinn.constants.values(), record);

            if !record.is_finite() && !warned {
                warn!(iteration = i, "損失が有限ではなくなりました");
                warned = true;
            }

            let grads = terms.total.backward();
            let grads = GradientsParams::from_grads(grads, &pinn);
            pinn = optim.step(config.learning_rate, pinn, grads);

            if i % config.plot_stride == 0 {
                info!(
                    "[Iter {}] Total Loss: {:.6}, Physics Loss: {:.6}, Data Loss: {:.6}, Validation: {:.6}",
                    i,
                    record.total,
                    record.physics(),
                    record.data,
                    record.validation
                );
                let curve = self.dense_curve(&pinn, i)?;
                reporter.snapshot(&curve, &self.observations.observed)?;
            }
            if i == 0 || i == iterations - 1 {
                let curve = self.dense_curve(&pinn, i)?;
                reporter.comparison(&curve, &self.observations.observed)?;
            }
        }

        reporter.finish(&log)?;
        Ok(TrainingOutcome { pinn, log })
    }
}

/// 実験設定に対応する Adam の設定。
pub fn adam(config: &ExperimentConfig) -> AdamConfig {
    AdamConfig::new().with_epsilon(config.adam_epsilon)
}

/// 参照軌道から実験を用意して学習を実行します。
pub fn train<B: AutodiffBackend>(
    config: &ExperimentConfig,
    trajectory: &ReferenceTrajectory,
    device: &B::Device,
    reporter: &mut impl Reporter,
) -> PinnResult<TrainingOutcome<B>> {
    Experiment::prepare(config, trajectory, device)?.run(reporter)
}

/// `train`サブコマンドを実行します。
pub fn run(data: &Path, out_dir: &Path) -> PinnResult<()> {
    let config = ExperimentConfig::new();
    let trajectory = ReferenceTrajectory::load_npz(data)?;
    fs::create_dir_all(out_dir)?;
    let mut reporter = PlotReporter::new(out_dir, &trajectory, &config)?;
    run_experiment(&config, &trajectory, out_dir, &mut reporter)
}

/// 学習を実行し、設定・推定結果・モデルを `out_dir` に保存します。
///
/// 設定の検証は `Experiment::prepare` で一度だけ行います。
pub fn run_experiment(
    config: &ExperimentConfig,
    trajectory: &ReferenceTrajectory,
    out_dir: &Path,
    reporter: &mut impl Reporter,
) -> PinnResult<()> {
    let device = default_device();
    fs::create_dir_all(out_dir)?;
    config.save(out_dir.join("config.json"))?;

    let training_start = Instant::now();
    let outcome = train::<TrainingBackend>(config, trajectory, &device, reporter)?;
    info!("学習が完了しました。学習時間: {:.2?}", training_start.elapsed());

    let estimates = outcome.pinn.constants.values();
    for ((name, estimate), nominal) in CONSTANT_NAMES
        .iter()
        .zip(estimates)
        .zip(config.motor.as_array())
    {
        info!("{name}: 推定値 {estimate:.5} / 真値 {nominal:.5}");
    }

    outcome
        .pinn
        .save_file(
            out_dir.join(MODEL_FILENAME),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(|e| PinnError::Record(e.to_string()))?;
    info!("=> モデルを '{}' に保存しました。", out_dir.join(MODEL_FILENAME).display());

    Ok(())
}
