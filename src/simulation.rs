//! DCモータの参照シミュレーション。
//!
//! 状態 `(ω, dω/dt, i)` を RK4 で積分します。運動方程式は学習時の残差と同じ形です。
//!
//! ```text
//! J ω'' = Kt i - b ω' - W
//! L i'  = V - Ke ω' - R i
//! ```

use std::path::Path;

use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::info;

use crate::config::{MotorParameters, SimulationConfig};
use crate::dataset::ReferenceTrajectory;
use crate::error::{PinnError, PinnResult};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MotorState {
    velocity: f64,
    acceleration: f64,
    current: f64,
}

#[derive(Debug, Clone, Copy)]
struct Deriv {
    velocity: f64,
    acceleration: f64,
    current: f64,
}

#[derive(Debug, Clone, Copy)]
struct Plant {
    inertia: f64,
    damping: f64,
    torque_constant: f64,
    inductance: f64,
    resistance: f64,
    back_emf: f64,
}

impl Plant {
    fn new(motor: &MotorParameters) -> Self {
        Self {
            inertia: motor.inertia as f64,
            damping: motor.damping as f64,
            torque_constant: motor.torque_constant as f64,
            inductance: motor.inductance as f64,
            resistance: motor.resistance as f64,
            back_emf: motor.back_emf as f64,
        }
    }

    fn dynamics(&self, s: &MotorState, voltage: f64, disturbance: f64) -> Deriv {
        Deriv {
            velocity: s.acceleration,
            acceleration: (self.torque_constant * s.current
                - self.damping * s.acceleration
                - disturbance)
                / self.inertia,
            current: (voltage - self.back_emf * s.acceleration - self.resistance * s.current)
                / self.inductance,
        }
    }

    /// 入力を区間内で一定とした RK4 の1ステップ。
    fn rk4_step(&self, s: &MotorState, dt: f64, voltage: f64, disturbance: f64) -> MotorState {
        let add_scaled = |a: &MotorState, k: Deriv, h: f64| MotorState {
            velocity: a.velocity + h * k.velocity,
            acceleration: a.acceleration + h * k.acceleration,
            current: a.current + h * k.current,
        };

        let k1 = self.dynamics(s, voltage, disturbance);
        let k2 = self.dynamics(&add_scaled(s, k1, 0.5 * dt), voltage, disturbance);
        let k3 = self.dynamics(&add_scaled(s, k2, 0.5 * dt), voltage, disturbance);
        let k4 = self.dynamics(&add_scaled(s, k3, dt), voltage, disturbance);

        MotorState {
            velocity: s.velocity
                + (dt / 6.0) * (k1.velocity + 2.0 * k2.velocity + 2.0 * k3.velocity + k4.velocity),
            acceleration: s.acceleration
                + (dt / 6.0)
                    * (k1.acceleration
                        + 2.0 * k2.acceleration
                        + 2.0 * k3.acceleration
                        + k4.acceleration),
            current: s.current
                + (dt / 6.0) * (k1.current + 2.0 * k2.current + 2.0 * k3.current + k4.current),
        }
    }
}

/// 時刻 `t` における矩形波入力電圧 (前半周期で振幅、後半周期で0)。
pub fn square_wave(config: &SimulationConfig, t: f64) -> f64 {
    if config.voltage_period <= 0.0 {
        return config.voltage_amplitude;
    }
    let phase = t.rem_euclid(config.voltage_period);
    if phase < 0.5 * config.voltage_period {
        config.voltage_amplitude
    } else {
        0.0
    }
}

/// 参照軌道をシミュレーションで生成します。
///
/// 行数は `round(t_final / dt) + 1` です。外乱トルクは各区間で一定の正規乱数
/// `dist_intensity · N(0, 1)` で、同じ行に記録されます。
pub fn simulate(
    config: &SimulationConfig,
    motor: &MotorParameters,
) -> PinnResult<ReferenceTrajectory> {
    if !(config.dt > 0.0 && config.t_final > 0.0) {
        return Err(PinnError::Config("dt と t_final は正の値が必要です".into()));
    }
    if motor.inertia == 0.0 || motor.inductance == 0.0 {
        return Err(PinnError::Config(
            "慣性モーメントとインダクタンスは0にできません".into(),
        ));
    }

    let plant = Plant::new(motor);
    let steps = (config.t_final / config.dt).round() as usize;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut inputs = Array2::<f32>::zeros((steps + 1, 3));
    let mut outputs = Array2::<f32>::zeros((steps + 1, 2));
    let mut state = MotorState::default();

    for k in 0..=steps {
        let t = k as f64 * config.dt;
        let voltage = square_wave(config, t);
        let noise: f64 = StandardNormal.sample(&mut rng);
        let disturbance = config.dist_intensity * noise;

        inputs[[k, 0]] = t as f32;
        inputs[[k, 1]] = voltage as f32;
        inputs[[k, 2]] = disturbance as f32;
        outputs[[k, 0]] = state.velocity as f32;
        outputs[[k, 1]] = state.current as f32;

        state = plant.rk4_step(&state, config.dt, voltage, disturbance);
    }

    ReferenceTrajectory::new(inputs, outputs)
}

/// `simulate` サブコマンド: 既定の設定で参照データを生成して保存します。
pub fn run(output: &Path) -> PinnResult<()> {
    let config = SimulationConfig::new();
    let motor = MotorParameters::new();
    let trajectory = simulate(&config, &motor)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    trajectory.save_npz(output)?;
    info!(
        rows = trajectory.len(),
        path = %output.display(),
        "参照データを保存しました"
    );
    Ok(())
}
