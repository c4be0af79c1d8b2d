use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Tanh;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::PhysicalConstants;

/// 全結合ネットワークのトポロジー設定。
#[derive(Config, Debug)]
pub struct NetworkConfig {
    /// 入力次元 (時刻)
    #[config(default = 1)]
    pub input: usize,
    /// 出力次元 (角速度, 電流)
    #[config(default = 2)]
    pub output: usize,
    /// 隠れ層の幅
    #[config(default = 32)]
    pub hidden: usize,
    /// 隠れブロックの数 (入力層を含む)
    #[config(default = 3)]
    pub layers: usize,
}

impl NetworkConfig {
    /// 層レコードの列を組み立てて、新しいネットワークを初期化します。
    ///
    /// 重みとバイアスは `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` から、呼び出し側の乱数で生成します。
    pub fn init<B: Backend, R: Rng>(&self, device: &B::Device, rng: &mut R) -> Network<B> {
        let mut layers = Vec::with_capacity(self.layers + 1);
        layers.push(DenseLayer::uniform(self.input, self.hidden, true, device, rng));
        for _ in 1..self.layers {
            layers.push(DenseLayer::uniform(self.hidden, self.hidden, true, device, rng));
        }
        layers.push(DenseLayer::uniform(self.hidden, self.output, false, device, rng));
        Network { layers }
    }
}

/// 層の形状。ネットワークの構成を検査・保存するために使います。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerShape {
    pub inputs: usize,
    pub outputs: usize,
    pub tanh: bool,
}

/// (重み, バイアス, 活性化関数) の組からなる1層分のレコード。
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    /// 形状 `[d_in, d_out]`
    pub weight: Param<Tensor<B, 2>>,
    /// 形状 `[d_out]`
    pub bias: Param<Tensor<B, 1>>,
    pub activation: Option<Tanh>,
}

impl<B: Backend> DenseLayer<B> {
    /// 与えられた重みとバイアスから層を作ります。
    pub fn new(weight: Tensor<B, 2>, bias: Tensor<B, 1>, tanh: bool) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
            activation: tanh.then(Tanh::new),
        }
    }

    fn uniform<R: Rng>(
        d_in: usize,
        d_out: usize,
        tanh: bool,
        device: &B::Device,
        rng: &mut R,
    ) -> Self {
        let bound = 1.0 / (d_in as f32).sqrt();
        let weights: Vec<f32> = (0..d_in * d_out)
            .map(|_| rng.random_range(-bound..bound))
            .collect();
        let biases: Vec<f32> = (0..d_out).map(|_| rng.random_range(-bound..bound)).collect();
        Self::new(
            Tensor::from_data(TensorData::new(weights, [d_in, d_out]), device),
            Tensor::from_data(TensorData::new(biases, [d_out]), device),
            tanh,
        )
    }

    /// アフィン変換 `x W + b`。
    pub fn affine(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        input.matmul(self.weight.val()) + self.bias.val().unsqueeze::<2>()
    }

    /// 接ベクトルの変換 `x' W`。バイアスは微分で消えます。
    pub fn project(&self, tangent: Tensor<B, 2>) -> Tensor<B, 2> {
        tangent.matmul(self.weight.val())
    }

    pub fn is_tanh(&self) -> bool {
        self.activation.is_some()
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.affine(input);
        match &self.activation {
            Some(activation) => activation.forward(x),
            None => x,
        }
    }

    pub fn shape(&self) -> LayerShape {
        let [inputs, outputs] = self.weight.val().dims();
        LayerShape {
            inputs,
            outputs,
            tanh: self.is_tanh(),
        }
    }
}

/// 時刻 `t` から (角速度, 電流) を予測する代理モデル。
#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> Network<B> {
    /// 層レコードの列から直接ネットワークを作ります。
    pub fn from_layers(layers: Vec<DenseLayer<B>>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[DenseLayer<B>] {
        &self.layers
    }

    /// 順伝播 `[N, 1] -> [N, 2]`。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers
            .iter()
            .fold(input, |x, layer| layer.forward(x))
    }

    pub fn topology(&self) -> Vec<LayerShape> {
        self.layers.iter().map(DenseLayer::shape).collect()
    }
}

/// ネットワークと物理定数をまとめた学習対象。
///
/// 両者を1つのモジュールに持たせることで、オプティマイザの1ステップで同時に更新されます。
#[derive(Module, Debug)]
pub struct Pinn<B: Backend> {
    pub network: Network<B>,
    pub constants: PhysicalConstants<B>,
}

impl<B: Backend> Pinn<B> {
    pub fn new(network: Network<B>, constants: PhysicalConstants<B>) -> Self {
        Self { network, constants }
    }

    pub fn forward(&self, times: Tensor<B, 2>) -> Tensor<B, 2> {
        self.network.forward(times)
    }
}
