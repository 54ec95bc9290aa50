//! Trees and configurations written to disk and read back.

mod common;

use common::*;
use rforest_offload::*;
use tempfile::TempDir;

#[test]
fn test_trained_tree_survives_a_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let set = noise_set(3, 3, 50, 13);
    let params = offset_probe_params(6, 4, 2.0);
    let mut trainer = ClassificationTrainer::classification(probe_device(test_device_config()));
    let mut tree = Tree::classification(7, 5, 2, 3).unwrap();
    trainer.train(&mut tree, &set, &params, 1, 5).unwrap();

    let path = dir.path().join("tree7.json");
    tree.save_to_file(&path).unwrap();
    let loaded = Tree::load_from_file(&path).unwrap();
    assert_eq!(loaded, tree);

    let image = set.images()[0].image().clone();
    let mut original = ForestClassifier::new(vec![tree], trainer.into_device()).unwrap();
    let expected = original.predict_posterior(&image, None).unwrap();
    let mut reloaded =
        ForestClassifier::new(vec![loaded], probe_device(test_device_config())).unwrap();
    assert_eq!(reloaded.predict_posterior(&image, None).unwrap(), expected);
}

#[test]
fn test_parameters_from_toml_reproduce_the_tree() {
    let dir = TempDir::new().unwrap();
    let set = two_tone_set(3, 30, 2);
    let params = offset_probe_params(5, 5, 1.0);
    let path = dir.path().join("params.toml");
    params.save_to_file(&path).unwrap();
    let loaded = TrainerParams::load_from_file(&path).unwrap();
    assert_eq!(loaded, params);

    let mut trainer = ClassificationTrainer::classification(probe_device(test_device_config()));
    let mut a = Tree::classification(0, 4, 2, 2).unwrap();
    let mut b = Tree::classification(0, 4, 2, 2).unwrap();
    trainer.train(&mut a, &set, &params, 1, 4).unwrap();
    trainer.train(&mut b, &set, &loaded, 1, 4).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_device_config_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = DeviceConfig::default()
        .with_num_threads(3)
        .with_fifo_capacity(4)
        .with_histogram_memory_budget(1 << 20);
    let path = dir.path().join("device.json");
    config.save_to_file(&path).unwrap();
    assert_eq!(DeviceConfig::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_tree_document_is_rejected_when_inconsistent() {
    let json = r#"{
        "TreeId": 0,
        "Depth": 2,
        "Task": "Classification",
        "FeatDim": 2,
        "OutputDim": 2,
        "Nodes": {
            "0": { "LeftChild": 1, "SplitParameters": "0 0 50", "Histogram": "0.5 0.5" }
        }
    }"#;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, json).unwrap();
    // Node 0 is split but its children were never written.
    assert!(Tree::load_from_file(&path).is_err());
}
