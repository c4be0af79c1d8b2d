use burn::nn::loss::{MseLoss, Reduction};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

use crate::constants::PhysicalConstants;
use crate::derivative::Derivatives;

fn scalar<B: AutodiffBackend>(param: Tensor<B, 1>) -> Tensor<B, 2> {
    param.unsqueeze::<2>()
}

/// 機械系の残差 `J·d²ω/dt² + b·dω/dt − Kt·i + W_pert`。
pub fn mechanical_residual<B: AutodiffBackend>(
    constants: &PhysicalConstants<B>,
    d: &Derivatives<B>,
    disturbance: Tensor<B, 2>,
) -> Tensor<B, 2> {
    d.velocity_curvature.clone().mul(scalar(constants.inertia.val()))
        + d.velocity_rate.clone().mul(scalar(constants.damping.val()))
        - d.current.clone().mul(scalar(constants.torque_constant.val()))
        + disturbance
}

/// 電気系の残差 `L·di/dt + Ke·dω/dt + R·i − V_in`。
pub fn electrical_residual<B: AutodiffBackend>(
    constants: &PhysicalConstants<B>,
    d: &Derivatives<B>,
    voltage: Tensor<B, 2>,
) -> Tensor<B, 2> {
    d.current_rate.clone().mul(scalar(constants.inductance.val()))
        + d.velocity_rate.clone().mul(scalar(constants.back_emf.val()))
        + d.current.clone().mul(scalar(constants.resistance.val()))
        - voltage
}

/// 残差の二乗平均。
pub fn mean_square<B: AutodiffBackend>(residual: Tensor<B, 2>) -> Tensor<B, 1> {
    residual.powf_scalar(2.0).mean()
}

/// 予測と目標の平均二乗誤差。
pub fn data_loss<B: Backend>(
    predictions: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    MseLoss::new().forward(predictions, targets, Reduction::Mean)
}

/// 1反復分の損失の各項。
#[derive(Debug, Clone)]
pub struct LossTerms<B: AutodiffBackend> {
    /// mean(機械系残差²)
    pub mechanical: Tensor<B, 1>,
    /// mean(電気系残差²)
    pub electrical: Tensor<B, 1>,
    pub data: Tensor<B, 1>,
    /// `mechanical + electrical + λ·data`
    pub total: Tensor<B, 1>,
    /// 報告専用。最適化の目的関数には含みません。
    pub validation: Tensor<B, 1>,
}

/// 損失の各項のスカラー値。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub mechanical: f32,
    pub electrical: f32,
    pub data: f32,
    pub total: f32,
    pub validation: f32,
}

impl LossRecord {
    pub fn physics(&self) -> f32 {
        self.mechanical + self.electrical
    }

    pub fn is_finite(&self) -> bool {
        [
            self.mechanical,
            self.electrical,
            self.data,
            self.total,
            self.validation,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

impl<B: AutodiffBackend> LossTerms<B> {
    /// 物理損失 `mechanical + electrical`。
    pub fn physics(&self) -> Tensor<B, 1> {
        self.mechanical.clone() + self.electrical.clone()
    }

    pub fn record(&self) -> LossRecord {
        let value = |t: &Tensor<B, 1>| t.clone().into_scalar().elem::<f32>();
        LossRecord {
            mechanical: value(&self.mechanical),
            electrical: value(&self.electrical),
            data: value(&self.data),
            total: value(&self.total),
            validation: value(&self.validation),
        }
    }
}

/// 物理損失とデータ損失を組み合わせます。
///
/// 総損失は `physics + λ·data` で、他の項は含みません。
pub fn assemble<B: AutodiffBackend>(
    mechanical: Tensor<B, 2>,
    electrical: Tensor<B, 2>,
    data: Tensor<B, 1>,
    validation: Tensor<B, 1>,
    lambda: f32,
) -> LossTerms<B> {
    let mechanical = mean_square(mechanical);
    let electrical = mean_square(electrical);
    let total = mechanical.clone() + electrical.clone() + data.clone().mul_scalar(lambda);
    LossTerms {
        mechanical,
        electrical,
        data,
        total,
        validation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::column_tensor;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    const NOMINAL: [f32; 6] = [0.1, 0.5, 1.0, 1.0, 5.0, 1.0];

    /// ω = sin t と、機械系・電気系の方程式を厳密に満たす i, W, V を作ります。
    fn exact_solution(
        ts: &[f32],
    ) -> (Derivatives<TestBackend>, Tensor<TestBackend, 2>, Tensor<TestBackend, 2>) {
        let device = Default::default();
        let [j, b, kt, l, r, ke] = NOMINAL;
        let w: Vec<f32> = ts.iter().map(|t| t.sin()).collect();
        let dw: Vec<f32> = ts.iter().map(|t| t.cos()).collect();
        let d2w: Vec<f32> = ts.iter().map(|t| -t.sin()).collect();
        let dist: Vec<f32> = ts.iter().map(|t| 0.01 * t).collect();
        // Kt i = J ω'' + b ω' + W
        let current: Vec<f32> = (0..ts.len())
            .map(|k| (j * d2w[k] + b * dw[k] + dist[k]) / kt)
            .collect();
        let d3w: Vec<f32> = ts.iter().map(|t| -t.cos()).collect();
        let current_rate: Vec<f32> = (0..ts.len())
            .map(|k| (j * d3w[k] + b * d2w[k] + 0.01) / kt)
            .collect();
        let voltage: Vec<f32> = (0..ts.len())
            .map(|k| l * current_rate[k] + ke * dw[k] + r * current[k])
            .collect();

        let d = Derivatives {
            velocity: column_tensor(w, &device),
            current: column_tensor(current, &device),
            velocity_rate: column_tensor(dw, &device),
            current_rate: column_tensor(current_rate, &device),
            velocity_curvature: column_tensor(d2w, &device),
        };
        (
            d,
            column_tensor(dist, &device),
            column_tensor(voltage, &device),
        )
    }

    #[test]
    fn residuals_vanish_for_exact_solution() {
        let device = Default::default();
        let constants = PhysicalConstants::<TestBackend>::new(NOMINAL, &device);
        let ts: Vec<f32> = (0..50).map(|k| k as f32 * 0.1).collect();
        let (d, dist, voltage) = exact_solution(&ts);

        let mech = mean_square(mechanical_residual(&constants, &d, dist));
        let elec = mean_square(electrical_residual(&constants, &d, voltage));
        assert!(mech.into_scalar() < 1e-10);
        assert!(elec.into_scalar() < 1e-10);
    }

    #[test]
    fn wrong_constants_leave_residual() {
        let device = Default::default();
        let mut wrong = NOMINAL;
        wrong[0] *= 2.0;
        let constants = PhysicalConstants::<TestBackend>::new(wrong, &device);
        let ts: Vec<f32> = (1..20).map(|k| k as f32 * 0.2).collect();
        let (d, dist, _) = exact_solution(&ts);

        let mech = mean_square(mechanical_residual(&constants, &d, dist));
        assert!(mech.into_scalar() > 1e-4);
    }

    #[test]
    fn total_is_physics_plus_weighted_data() {
        let device = Default::default();
        let mech = column_tensor::<TestBackend>(vec![0.5, -1.0, 2.0], &device);
        let elec = column_tensor::<TestBackend>(vec![0.1, 0.2, -0.3], &device);
        let data = data_loss(
            column_tensor::<TestBackend>(vec![1.0, 2.0], &device),
            column_tensor::<TestBackend>(vec![1.5, 1.0], &device),
        );
        let validation = Tensor::<TestBackend, 1>::from_floats([7.0], &device);
        let lambda = 100.0;

        let record = assemble(mech, elec, data, validation, lambda).record();
        assert!((record.mechanical - 5.25 / 3.0).abs() < 1e-6);
        assert!((record.electrical - 0.14 / 3.0).abs() < 1e-6);
        assert!((record.data - 0.625).abs() < 1e-6);
        assert_eq!(record.total, record.physics() + lambda * record.data);
        assert_eq!(record.validation, 7.0);
    }

    #[test]
    fn constants_receive_gradients() {
        let device = Default::default();
        let constants = PhysicalConstants::<TestBackend>::new(NOMINAL.map(|v| v * 1.3), &device);
        let ts: Vec<f32> = (0..10).map(|k| k as f32 * 0.3).collect();
        let (d, dist, voltage) = exact_solution(&ts);

        let loss = mean_square(mechanical_residual(&constants, &d, dist))
            + mean_square(electrical_residual(&constants, &d, voltage));
        let grads = loss.backward();
        for param in [&constants.inertia, &constants.inductance, &constants.back_emf] {
            let g = param.val().grad(&grads).unwrap().into_scalar();
            assert!(g.abs() > 0.0);
        }
    }
}
