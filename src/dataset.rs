//! 参照軌道の読み書きと、観測点・コロケーション点・検証点のサンプリング。

use std::fs::File;
use std::path::Path;

use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array1, Array2, Axis, Ix1, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use rand::Rng;
use rand::seq::index;
use rand_distr::StandardNormal;
use tracing::debug;

use crate::error::{PinnError, PinnResult};

/// 参照軌道の列 (入力行列 `X_star`)。
pub const TIME: usize = 0;
pub const VOLTAGE: usize = 1;
pub const DISTURBANCE: usize = 2;

/// 参照軌道の列 (出力行列 `u_star`)。
pub const VELOCITY: usize = 0;
pub const CURRENT: usize = 1;

/// 時刻順に並んだ参照シミュレーション結果。読み込み後は変更しません。
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTrajectory {
    /// `[M, 3]`: 時刻, 入力電圧, 外乱トルク
    pub inputs: Array2<f32>,
    /// `[M, 2]`: 角速度, 電流 (ノイズなし)
    pub outputs: Array2<f32>,
    /// 入力行列の列ごとの下限
    pub lower: Array1<f32>,
    /// 入力行列の列ごとの上限
    pub upper: Array1<f32>,
}

impl ReferenceTrajectory {
    /// 入力と出力から軌道を作り、領域の上下限を計算します。
    pub fn new(inputs: Array2<f32>, outputs: Array2<f32>) -> PinnResult<Self> {
        check_shapes(&inputs, &outputs).map_err(PinnError::Config)?;
        let lower = inputs.fold_axis(Axis(0), f32::INFINITY, |&acc, &x| acc.min(x));
        let upper = inputs.fold_axis(Axis(0), f32::NEG_INFINITY, |&acc, &x| acc.max(x));
        Ok(Self {
            inputs,
            outputs,
            lower,
            upper,
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn time(&self, row: usize) -> f32 {
        self.inputs[[row, TIME]]
    }

    pub fn input_column(&self, column: usize) -> Vec<f32> {
        self.inputs.column(column).to_vec()
    }

    pub fn output_column(&self, column: usize) -> Vec<f32> {
        self.outputs.column(column).to_vec()
    }

    fn select_inputs(&self, rows: &[usize], column: usize) -> Vec<f32> {
        rows.iter().map(|&k| self.inputs[[k, column]]).collect()
    }

    fn select_outputs(&self, rows: &[usize]) -> Vec<f32> {
        self.outputs.select(Axis(0), rows).iter().copied().collect()
    }

    /// `.npz` アーカイブ (`X_star`, `u_star`, `lb`, `ub`) から読み込みます。
    pub fn load_npz(path: impl AsRef<Path>) -> PinnResult<Self> {
        let path = path.as_ref();
        let fail = |message: String| PinnError::Dataset {
            path: path.to_path_buf(),
            message,
        };

        let file = File::open(path).map_err(|e| fail(e.to_string()))?;
        let mut npz = NpzReader::new(file).map_err(|e| fail(e.to_string()))?;

        let inputs = read_matrix(&mut npz, "X_star").map_err(fail)?;
        let outputs = read_matrix(&mut npz, "u_star").map_err(fail)?;
        let lower = read_vector(&mut npz, "lb").map_err(fail)?;
        let upper = read_vector(&mut npz, "ub").map_err(fail)?;

        check_shapes(&inputs, &outputs).map_err(fail)?;
        if lower.len() != 3 || upper.len() != 3 {
            return Err(fail("lb と ub の長さは3である必要があります".into()));
        }

        debug!(rows = inputs.nrows(), path = %path.display(), "参照データを読み込みました");
        Ok(Self {
            inputs,
            outputs,
            lower,
            upper,
        })
    }

    /// `.npz` アーカイブとして保存します。
    pub fn save_npz(&self, path: impl AsRef<Path>) -> PinnResult<()> {
        let path = path.as_ref();
        let fail = |message: String| PinnError::Dataset {
            path: path.to_path_buf(),
            message,
        };

        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array("X_star", &self.inputs)
            .map_err(|e| fail(e.to_string()))?;
        npz.add_array("u_star", &self.outputs)
            .map_err(|e| fail(e.to_string()))?;
        npz.add_array("lb", &self.lower)
            .map_err(|e| fail(e.to_string()))?;
        npz.add_array("ub", &self.upper)
            .map_err(|e| fail(e.to_string()))?;
        npz.finish().map_err(|e| fail(e.to_string()))?;
        Ok(())
    }
}

fn check_shapes(inputs: &Array2<f32>, outputs: &Array2<f32>) -> Result<(), String> {
    if inputs.ncols() != 3 || outputs.ncols() != 2 {
        return Err(format!(
            "X_star は [M, 3]、u_star は [M, 2] である必要があります (実際: {:?}, {:?})",
            inputs.shape(),
            outputs.shape()
        ));
    }
    if inputs.nrows() != outputs.nrows() || inputs.is_empty() {
        return Err(format!(
            "X_star と u_star の行数が不正です ({} と {})",
            inputs.nrows(),
            outputs.nrows()
        ));
    }
    Ok(())
}

fn read_matrix(npz: &mut NpzReader<File>, key: &str) -> Result<Array2<f32>, String> {
    let named = format!("{key}.npy");
    npz.by_name::<OwnedRepr<f32>, Ix2>(&named)
        .or_else(|_| npz.by_name::<OwnedRepr<f32>, Ix2>(key))
        .or_else(|_| {
            npz.by_name::<OwnedRepr<f64>, Ix2>(&named)
                .or_else(|_| npz.by_name::<OwnedRepr<f64>, Ix2>(key))
                .map(|a| a.mapv(|v| v as f32))
        })
        .map_err(|e| format!("{key} を読み込めません: {e}"))
}

fn read_vector(npz: &mut NpzReader<File>, key: &str) -> Result<Array1<f32>, String> {
    let named = format!("{key}.npy");
    npz.by_name::<OwnedRepr<f32>, Ix1>(&named)
        .or_else(|_| npz.by_name::<OwnedRepr<f32>, Ix1>(key))
        .or_else(|_| {
            npz.by_name::<OwnedRepr<f64>, Ix1>(&named)
                .or_else(|_| npz.by_name::<OwnedRepr<f64>, Ix1>(key))
                .map(|a| a.mapv(|v| v as f32))
        })
        .map_err(|e| format!("{key} を読み込めません: {e}"))
}

/// `round(linspace(0, len - 1, count))` の行インデックス。
pub fn evenly_spaced(len: usize, count: usize) -> Vec<usize> {
    match (len, count) {
        (0, _) | (_, 0) => Vec::new(),
        (_, 1) => vec![0],
        _ => {
            let span = (len - 1) as f64;
            (0..count)
                .map(|k| (k as f64 * span / (count - 1) as f64).round() as usize)
                .collect()
        }
    }
}

/// `linspace(start, end, count)`。
pub fn linspace(start: f32, end: f32, count: usize) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..count)
            .map(|k| start + (end - start) * k as f32 / (count - 1) as f32)
            .collect(),
    }
}

/// 値の列を形状 `[N, 1]` のテンソルにします。
pub fn column_tensor<B: Backend>(values: Vec<f32>, device: &B::Device) -> Tensor<B, 2> {
    let n = values.len();
    Tensor::from_data(TensorData::new(values, [n, 1]), device)
}

fn matrix_tensor<B: Backend>(values: Vec<f32>, cols: usize, device: &B::Device) -> Tensor<B, 2> {
    let rows = values.len() / cols;
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

/// テンソルの値をホスト側の `Vec<f32>` として読み出します。
pub fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> PinnResult<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PinnError::Data(format!("{e:?}")))
}

/// 観測点のホスト側のコピー。描画に使います。
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub times: Vec<f32>,
    pub velocity: Vec<f32>,
    pub current: Vec<f32>,
}

/// ノイズを加えた観測データ。データ損失だけに使います。
#[derive(Debug, Clone)]
pub struct ObservationSet<B: Backend> {
    /// `[n_data, 1]`
    pub times: Tensor<B, 2>,
    /// `[n_data, 2]` (ノイズ付き)
    pub outputs: Tensor<B, 2>,
    pub indices: Vec<usize>,
    pub observed: Observed,
}

impl<B: Backend> ObservationSet<B> {
    /// 参照軌道から `count` 行を非復元抽出し、出力に `noise · N(0, 1)` を加えます。
    pub fn sample<R: Rng>(
        trajectory: &ReferenceTrajectory,
        count: usize,
        noise: f32,
        rng: &mut R,
        device: &B::Device,
    ) -> PinnResult<Self> {
        if count > trajectory.len() {
            return Err(PinnError::Config(format!(
                "観測点数 {count} が参照データの行数 {} を超えています",
                trajectory.len()
            )));
        }

        let indices = index::sample(rng, trajectory.len(), count).into_vec();
        let times = trajectory.select_inputs(&indices, TIME);
        let outputs: Vec<f32> = trajectory
            .select_outputs(&indices)
            .into_iter()
            .map(|u| u + noise * rng.sample::<f32, _>(StandardNormal))
            .collect();

        let observed = Observed {
            times: times.clone(),
            velocity: outputs.iter().step_by(2).copied().collect(),
            current: outputs.iter().skip(1).step_by(2).copied().collect(),
        };

        Ok(Self {
            times: column_tensor(times, device),
            outputs: matrix_tensor(outputs, 2, device),
            indices,
            observed,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// 物理損失を評価するコロケーション点。
///
/// 時刻テンソルは勾配追跡付きで、入力電圧と外乱トルクは既知の外生信号として固定します。
#[derive(Debug, Clone)]
pub struct CollocationSet<B: Backend> {
    /// `[n_training, 1]` (`require_grad`)
    pub times: Tensor<B, 2>,
    /// V_in `[n_training, 1]`
    pub voltage: Tensor<B, 2>,
    /// W_pert `[n_training, 1]`
    pub disturbance: Tensor<B, 2>,
    pub indices: Vec<usize>,
}

impl<B: Backend> CollocationSet<B> {
    /// 参照軌道の時間軸上に等間隔で `count` 点をとります。
    pub fn evenly_spaced(
        trajectory: &ReferenceTrajectory,
        count: usize,
        device: &B::Device,
    ) -> Self {
        let indices = evenly_spaced(trajectory.len(), count);
        Self {
            times: column_tensor(trajectory.select_inputs(&indices, TIME), device).require_grad(),
            voltage: column_tensor(trajectory.select_inputs(&indices, VOLTAGE), device),
            disturbance: column_tensor(trajectory.select_inputs(&indices, DISTURBANCE), device),
            indices,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// 検証誤差の報告だけに使う、ノイズなしの参照点。
#[derive(Debug, Clone)]
pub struct ValidationSet<B: Backend> {
    pub times: Tensor<B, 2>,
    pub outputs: Tensor<B, 2>,
    pub indices: Vec<usize>,
}

impl<B: Backend> ValidationSet<B> {
    /// 時刻 `horizon` までの行から等間隔に `count` 点をとります。
    pub fn over_horizon(
        trajectory: &ReferenceTrajectory,
        count: usize,
        horizon: f32,
        device: &B::Device,
    ) -> PinnResult<Self> {
        let rows = (0..trajectory.len())
            .take_while(|&k| trajectory.time(k) <= horizon)
            .count();
        if rows == 0 {
            return Err(PinnError::Config(format!(
                "時刻 {horizon} までの参照データがありません"
            )));
        }

        let indices = evenly_spaced(rows, count);
        Ok(Self {
            times: column_tensor(trajectory.select_inputs(&indices, TIME), device),
            outputs: matrix_tensor(trajectory.select_outputs(&indices), 2, device),
            indices,
        })
    }
}
