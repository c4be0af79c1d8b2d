use burn::module::{Module, Param};
use burn::prelude::Backend;
use burn::tensor::{ElementConversion, Tensor};
use rand::Rng;

use crate::config::{GuessBounds, MotorParameters};

/// 学習可能な6つの物理定数。各定数は形状 `[1]` のパラメータです。
#[derive(Module, Debug)]
pub struct PhysicalConstants<B: Backend> {
    pub inertia: Param<Tensor<B, 1>>,
    pub damping: Param<Tensor<B, 1>>,
    pub torque_constant: Param<Tensor<B, 1>>,
    pub inductance: Param<Tensor<B, 1>>,
    pub resistance: Param<Tensor<B, 1>>,
    pub back_emf: Param<Tensor<B, 1>>,
}

impl<B: Backend> PhysicalConstants<B> {
    /// `[J, b, Kt, L, R, Ke]` の順の初期値から作ります。
    pub fn new(values: [f32; 6], device: &B::Device) -> Self {
        let param = |v: f32| Param::from_tensor(Tensor::from_floats([v], device));
        let [j, b, kt, l, r, ke] = values;
        Self {
            inertia: param(j),
            damping: param(b),
            torque_constant: param(kt),
            inductance: param(l),
            resistance: param(r),
            back_emf: param(ke),
        }
    }

    /// 現在の推定値を `[J, b, Kt, L, R, Ke]` の順で読み出します。
    pub fn values(&self) -> [f32; 6] {
        [
            &self.inertia,
            &self.damping,
            &self.torque_constant,
            &self.inductance,
            &self.resistance,
            &self.back_emf,
        ]
        .map(|p| p.val().into_scalar().elem::<f32>())
    }
}

/// 公称値を乱数で摂動した初期推定値を返します。
///
/// 各定数は `v + U(-infe·v, supe·v)` です。負の値になることもありますが、クランプはしません。
pub fn perturbed_guess<R: Rng>(
    nominal: &MotorParameters,
    bounds: &GuessBounds,
    rng: &mut R,
) -> [f32; 6] {
    nominal.as_array().map(|v| {
        let (a, b) = (-bounds.infe * v, bounds.supe * v);
        v + rng.random_range(a.min(b)..=a.max(b))
    })
}
