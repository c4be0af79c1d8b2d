use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use dc_motor_pinn::config::{ExperimentConfig, SamplingConfig, SimulationConfig};
use dc_motor_pinn::dataset::ReferenceTrajectory;
use dc_motor_pinn::model::NetworkConfig;
use dc_motor_pinn::simulation::simulate;
use dc_motor_pinn::training::{NoReport, train};

type TestBackend = Autodiff<NdArray<f32>>;

fn small_config() -> ExperimentConfig {
    ExperimentConfig::new()
        .with_iterations(3)
        .with_network(NetworkConfig::new().with_hidden(8).with_layers(2))
        .with_simulation(SimulationConfig::new().with_t_final(0.5))
        .with_sampling(SamplingConfig::new().with_n_training(12).with_n_validation(30))
}

#[test]
fn simulate_save_load_and_train() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dc_simulation.npz");
    let config = small_config();

    let trajectory = simulate(&config.simulation, &config.motor).unwrap();
    trajectory.save_npz(&path).unwrap();
    let loaded = ReferenceTrajectory::load_npz(&path).unwrap();
    assert_eq!(loaded, trajectory);

    config.validate(loaded.len()).unwrap();
    let outcome =
        train::<TestBackend>(&config, &loaded, &Default::default(), &mut NoReport).unwrap();
    assert_eq!(outcome.log.len(), 3);
    assert!(outcome.log.losses.iter().all(|r| r.is_finite()));
    assert!(outcome.pinn.constants.values().iter().all(|v| v.is_finite()));
}

#[test]
fn experiment_config_survives_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let config = small_config().with_lambda(10.0);

    config.save(&path).unwrap();
    let restored = ExperimentConfig::load(&path).unwrap();
    assert_eq!(restored.lambda, 10.0);
    assert_eq!(restored.iterations, 3);
    assert_eq!(restored.sampling.n_training, 12);
    assert_eq!(restored.network.hidden, 8);
}

#[test]
fn sampling_larger_than_reference_is_rejected() {
    let config = small_config().with_sampling(SamplingConfig::new().with_n_training(10_000));
    let trajectory = simulate(&config.simulation, &config.motor).unwrap();
    assert!(config.validate(trajectory.len()).is_err());
}
