mod common;

use briny_continual::catalog::Model;
use briny_continual::config::ExperimentConfig;
use briny_continual::experiment::{ExperimentLogger, JsonlLogger, TracingLogger, random_run_id, setup_experiment};
use briny_continual::{ContinualError, Device, SnapshotStore};
use common::{Mlp, scratch_dir};

#[test]
fn test_setup_writes_initial_snapshot() {
    let dir = scratch_dir("setup").join("exp");
    let mut config = ExperimentConfig::new(&dir, "perm-mnist", 2);
    config.seed = 9;
    let log = dir.join("log.jsonl");
    let mut logger = JsonlLogger::new(&log);

    let model: Mlp = setup_experiment(&config, &mut logger, |c| Mlp::small(c.seed)).unwrap();
    assert!(dir.join("init.bpat").is_file());

    let store = SnapshotStore::new(&dir);
    assert_eq!(store.load(0, "seq").unwrap(), model.parameters());

    let text = std::fs::read_to_string(&log).unwrap();
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["kind"], "parameters");
    assert_eq!(first["config"]["dataset"], "perm-mnist");
    assert_eq!(first["config"]["n_tasks"], 2);
}

#[test]
fn test_setup_rejects_invalid_config() {
    let dir = scratch_dir("setup_invalid");
    let config = ExperimentConfig::new(&dir, "perm-mnist", 0);
    let result = setup_experiment(&config, &mut TracingLogger, |_| Mlp::small(1));
    assert!(matches!(result, Err(ContinualError::Config(_))));
    assert!(!dir.join("init.bpat").exists());
}

#[test]
fn test_jsonl_metrics_append() {
    let dir = scratch_dir("jsonl");
    let mut logger = JsonlLogger::new(dir.join("metrics").join("run.jsonl"));
    logger.log_metric("accuracy", 0.91, 1).unwrap();
    logger.log_metric("accuracy", 0.87, 2).unwrap();

    let text = std::fs::read_to_string(logger.path()).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["kind"], "metric");
    assert_eq!(lines[1]["step"], 2);
    assert_eq!(lines[1]["value"], 0.87);
}

#[test]
fn test_config_file_round_trip() {
    let dir = scratch_dir("config");
    let path = dir.join("run.toml");
    let mut config = ExperimentConfig::new(dir.join("exp"), "split-cifar", 5);
    config.device = Device::Rayon;
    config.policy = "lmc".to_owned();
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();

    assert_eq!(ExperimentConfig::load_from_file(&path).unwrap(), config);
    assert!(matches!(
        ExperimentConfig::load_from_file(dir.join("absent.toml")),
        Err(ContinualError::Io(_))
    ));
}

#[test]
fn test_run_ids() {
    let a = random_run_id(8);
    assert_eq!(a.len(), 8);
    assert!(a.chars().all(|c| c.is_ascii_alphabetic()));
}
