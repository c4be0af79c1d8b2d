//! ネットワーク出力の時間微分。
//!
//! `Tensor::grad` は内部バックエンドのテンソルを返すため計算グラフから切り離されます。
//! ここでは層レコードに沿って接ベクトルを順方向に伝播し、通常のテンソル演算だけで
//! 1階・2階微分を求めます。得られた微分は自動微分グラフ上に残るので、
//! 損失の逆伝播は微分を通って重みと物理定数まで届きます。
//!
//! 接ベクトルの伝播は連鎖律を入力側から適用しているだけなので、1階・2階微分とも
//! グラフを保持したまま逆伝播を2回行った場合と同じ値になります。

use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;

use crate::error::{PinnError, PinnResult};
use crate::model::Network;

/// tanh層の出力 `h` とその時間微分 `h'`。
#[derive(Debug, Clone)]
struct ActivationTrace<B: AutodiffBackend> {
    value: Tensor<B, 2>,
    rate: Tensor<B, 2>,
}

/// 1層分の1階伝播の記録。2階微分の計算で再利用します。
#[derive(Debug, Clone)]
struct LayerTrace<B: AutodiffBackend> {
    /// 活性化前の時間微分 `z'`
    pre_rate: Tensor<B, 2>,
    activation: Option<ActivationTrace<B>>,
}

/// 1階微分の結果。
#[derive(Debug, Clone)]
pub struct FirstOrder<B: AutodiffBackend> {
    /// ネットワーク出力 `[N, 2]`
    pub outputs: Tensor<B, 2>,
    /// 出力の時間微分 `[N, 2]`
    pub rates: Tensor<B, 2>,
    trace: Vec<LayerTrace<B>>,
}

/// 物理残差に必要な出力と微分をまとめたもの。各テンソルの形状は `[N, 1]` です。
#[derive(Debug, Clone)]
pub struct Derivatives<B: AutodiffBackend> {
    /// ω
    pub velocity: Tensor<B, 2>,
    /// i
    pub current: Tensor<B, 2>,
    /// dω/dt
    pub velocity_rate: Tensor<B, 2>,
    /// di/dt
    pub current_rate: Tensor<B, 2>,
    /// d²ω/dt²
    pub velocity_curvature: Tensor<B, 2>,
}

fn column<B: AutodiffBackend>(tensor: &Tensor<B, 2>, index: usize) -> Tensor<B, 2> {
    let [n, _] = tensor.dims();
    tensor.clone().slice([0..n, index..index + 1])
}

/// `1 - h^2`
fn tanh_slope<B: AutodiffBackend>(h: &Tensor<B, 2>) -> Tensor<B, 2> {
    h.clone().mul(h.clone()).neg().add_scalar(1.0)
}

/// 時刻 `times` (`[N, 1]`) における出力とその1階時間微分を求めます。
///
/// 接ベクトルの種は全要素1のテンソルです。`times` が `require_grad` でない場合は
/// ゼロ微分を返さずに `PinnError::UntrackedInput` を返します。
pub fn first_derivative<B: AutodiffBackend>(
    network: &Network<B>,
    times: Tensor<B, 2>,
) -> PinnResult<FirstOrder<B>> {
    if !times.is_require_grad() {
        return Err(PinnError::UntrackedInput);
    }

    let mut rate = Tensor::ones_like(&times);
    let mut value = times;
    let mut trace = Vec::with_capacity(network.layers().len());

    for layer in network.layers() {
        let z = layer.affine(value);
        let z_rate = layer.project(rate);
        if layer.is_tanh() {
            let h = z.tanh();
            let h_rate = tanh_slope(&h).mul(z_rate.clone());
            trace.push(LayerTrace {
                pre_rate: z_rate,
                activation: Some(ActivationTrace {
                    value: h.clone(),
                    rate: h_rate.clone(),
                }),
            });
            value = h;
            rate = h_rate;
        } else {
            trace.push(LayerTrace {
                pre_rate: z_rate.clone(),
                activation: None,
            });
            value = z;
            rate = z_rate;
        }
    }

    Ok(FirstOrder {
        outputs: value,
        rates: rate,
        trace,
    })
}

/// 1階微分の結果をもう一度時間微分し、出力の2階時間微分 (`[N, 2]`) を返します。
///
/// tanh層では `h'' = (1 - h^2) z'' - 2 h h' z'` です。
pub fn second_derivative<B: AutodiffBackend>(
    network: &Network<B>,
    first: &FirstOrder<B>,
) -> PinnResult<Tensor<B, 2>> {
    if first.trace.len() != network.layers().len() {
        return Err(PinnError::Config(format!(
            "1階微分の記録 ({} 層) とネットワーク ({} 層) が一致しません",
            first.trace.len(),
            network.layers().len()
        )));
    }

    let [n, _] = first.outputs.dims();
    // 入力 t の2階微分は0
    let mut curvature = Tensor::<B, 2>::zeros([n, 1], &first.outputs.device());

    for (layer, step) in network.layers().iter().zip(&first.trace) {
        let z_curvature = layer.project(curvature);
        curvature = match &step.activation {
            Some(act) => {
                let coupling = act
                    .value
                    .clone()
                    .mul(act.rate.clone())
                    .mul(step.pre_rate.clone())
                    .mul_scalar(2.0);
                tanh_slope(&act.value).mul(z_curvature).sub(coupling)
            }
            None => z_curvature,
        };
    }

    Ok(curvature)
}

/// コロケーション時刻での ω, i, dω/dt, di/dt, d²ω/dt² を求めます。
///
/// 1階微分と2階微分は別々の2回の呼び出しとして計算します。
pub fn derivatives<B: AutodiffBackend>(
    network: &Network<B>,
    times: Tensor<B, 2>,
) -> PinnResult<Derivatives<B>> {
    let first = first_derivative(network, times)?;
    let curvature = second_derivative(network, &first)?;

    Ok(Derivatives {
        velocity: column(&first.outputs, 0),
        current: column(&first.outputs, 1),
        velocity_rate: column(&first.rates, 0),
        current_rate: column(&first.rates, 1),
        velocity_curvature: column(&curvature, 0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DenseLayer, NetworkConfig};
    use burn::backend::{Autodiff, NdArray};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn to_vec(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    fn sample_times(values: &[f32]) -> Tensor<TestBackend, 2> {
        let device = Default::default();
        Tensor::<TestBackend, 1>::from_floats(values, &device).reshape([values.len(), 1])
    }

    /// ω = tanh(t), i = 2 tanh(t) を厳密に表すネットワーク。
    fn tanh_network() -> Network<TestBackend> {
        let device = Default::default();
        let hidden = DenseLayer::new(
            Tensor::from_floats([[1.0]], &device),
            Tensor::from_floats([0.0], &device),
            true,
        );
        let output = DenseLayer::new(
            Tensor::from_floats([[1.0, 2.0]], &device),
            Tensor::from_floats([0.0, 0.0], &device),
            false,
        );
        Network::from_layers(vec![hidden, output])
    }

    #[test]
    fn matches_analytic_tanh_derivatives() {
        let ts = [-1.5f32, -0.3, 0.0, 0.4, 1.2];
        let d = derivatives(&tanh_network(), sample_times(&ts).require_grad()).unwrap();

        let rate = to_vec(d.velocity_rate);
        let current_rate = to_vec(d.current_rate);
        let curvature = to_vec(d.velocity_curvature);
        for (k, t) in ts.iter().enumerate() {
            let h = t.tanh();
            let slope = 1.0 - h * h;
            assert!((rate[k] - slope).abs() < 1e-5);
            assert!((current_rate[k] - 2.0 * slope).abs() < 1e-5);
            assert!((curvature[k] + 2.0 * h * slope).abs() < 1e-5);
        }
    }

    #[test]
    fn untracked_input_is_rejected() {
        let result = first_derivative(&tanh_network(), sample_times(&[0.0, 1.0]));
        assert!(matches!(result, Err(PinnError::UntrackedInput)));
    }

    #[test]
    fn agrees_with_finite_differences() {
        let device = Default::default();
        let network = NetworkConfig::new()
            .with_hidden(8)
            .with_layers(2)
            .init::<TestBackend, _>(&device, &mut StdRng::seed_from_u64(3));

        let ts = [-0.8f32, 0.1, 0.9];
        let step = 1e-2f32;
        let shifted = |delta: f32| {
            let moved: Vec<f32> = ts.iter().map(|t| t + delta).collect();
            to_vec(network.forward(sample_times(&moved)))
        };
        let (plus, mid, minus) = (shifted(step), shifted(0.0), shifted(-step));

        let first = first_derivative(&network, sample_times(&ts).require_grad()).unwrap();
        let curvature = to_vec(second_derivative(&network, &first).unwrap());
        let rates = to_vec(first.rates);

        for k in 0..ts.len() * 2 {
            let fd_rate = (plus[k] - minus[k]) / (2.0 * step);
            let fd_curvature = (plus[k] - 2.0 * mid[k] + minus[k]) / (step * step);
            assert!((rates[k] - fd_rate).abs() < 1e-3, "rate {k}");
            assert!((curvature[k] - fd_curvature).abs() < 2e-2, "curvature {k}");
        }
    }

    #[test]
    fn first_derivative_matches_reverse_mode() {
        let device = Default::default();
        let network = NetworkConfig::new()
            .with_hidden(6)
            .init::<TestBackend, _>(&device, &mut StdRng::seed_from_u64(5));
        let n = 4;
        let times = sample_times(&[0.0, 0.7, 1.4, 2.1]).require_grad();

        let out = network.forward(times.clone());
        let grads = out.slice([0..n, 0..1]).sum().backward();
        let reverse = times.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();

        let first = first_derivative(&network, times).unwrap();
        let forward = to_vec(first.rates.slice([0..n, 0..1]));
        for (r, f) in reverse.iter().zip(&forward) {
            assert!((r - f).abs() < 1e-5);
        }
    }

    #[test]
    fn gradients_flow_through_second_derivative() {
        let device = Default::default();
        let network = NetworkConfig::new()
            .with_hidden(4)
            .with_layers(2)
            .init::<TestBackend, _>(&device, &mut StdRng::seed_from_u64(11));
        let d = derivatives(&network, sample_times(&[0.2, 0.5, 0.8]).require_grad()).unwrap();

        let grads = d.velocity_curvature.powf_scalar(2.0).mean().backward();
        let weight_grad = network.layers()[0].weight.val().grad(&grads).unwrap();
        let norm: f32 = weight_grad
            .into_data()
            .to_vec::<f32>()
            .unwrap()
            .iter()
            .map(|g| g.abs())
            .sum();
        assert!(norm > 0.0);
    }
}
