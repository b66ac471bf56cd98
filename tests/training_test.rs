use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use pairwise_nn::data::{preprocess, Example, VectorTable};
use pairwise_nn::model::use_params;
use pairwise_nn::network::{ModelMetadata, PairModelConfig, PoolingKind, SavedModel};
use pairwise_nn::optim::{Optimizer, Sgd};
use pairwise_nn::train::{evaluate, train_loop, TrainConfig, Trainer};
use pairwise_nn::{Batch, Matrix, Model};

fn toy_table() -> Arc<VectorTable> {
    let words = [
        ("red", [0.9, 0.1, 0.0, 0.2]),
        ("blue", [0.1, 0.8, 0.3, 0.0]),
        ("green", [0.0, 0.2, 0.9, 0.4]),
        ("apple", [0.5, -0.3, 0.1, 0.7]),
        ("sky", [-0.4, 0.6, 0.2, -0.1]),
        ("grass", [0.2, 0.1, -0.6, 0.5]),
    ];
    let pairs = words.iter().map(|(w, v)| (w.to_string(), v.to_vec()));
    Arc::new(VectorTable::from_pairs(4, pairs).unwrap())
}

/// Label 1 when both texts are identical, 0 otherwise.
fn toy_examples() -> Vec<Example> {
    let texts = ["red apple", "blue sky", "green grass", "red sky", "blue apple", "green sky"];
    let mut rows = Vec::new();
    for (i, a) in texts.iter().enumerate() {
        rows.push(Example { text1: a.to_string(), text2: a.to_string(), label: 1 });
        let b = texts[(i + 1) % texts.len()];
        rows.push(Example { text1: a.to_string(), text2: b.to_string(), label: 0 });
    }
    rows
}

fn toy_config() -> PairModelConfig {
    PairModelConfig { width: 6, depth: 1, pieces: 2, pooling: PoolingKind::MeanMax, window: 1 }
}

fn quiet_config(nb_epoch: usize, batch_size: usize) -> TrainConfig {
    TrainConfig { dropout: 0.0, learn_rate: 0.01, quiet: true, ..TrainConfig::new(nb_epoch, batch_size) }
}

fn setup(nb_epoch: usize) -> (Box<dyn Model>, Trainer, Batch, Matrix) {
    let mut model = toy_config().build(toy_table()).unwrap();
    let (x, y) = preprocess(&toy_examples(), 2);
    let trainer = Trainer::begin_training(model.as_mut(), &x, &y, quiet_config(nb_epoch, 12)).unwrap();
    (model, trainer, x, y)
}

#[test]
fn test_begin_training_sizes_output_from_labels() {
    let (model, trainer, x, _) = setup(1);
    assert_eq!(model.nr_out(), Some(2));
    assert!(model.nr_weight() > 0);
    assert_eq!(trainer.batch_size, 12);

    let probs = model.predict(&x).unwrap().into_floats("test").unwrap();
    assert_eq!(probs.shape(), (12, 2));
    for row in &probs.data {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_training_reduces_loss() {
    let (mut model, mut trainer, x, y) = setup(40);
    let losses = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&losses);
    trainer.on_epoch(move |stats| sink.borrow_mut().push(stats.train_loss));

    let last = train_loop(model.as_mut(), &mut trainer, &x, &y, Some((&x, &y))).unwrap().unwrap();
    assert_eq!(last.epoch, 40);
    assert!(last.dev_accuracy_averaged.is_some());

    let losses = losses.borrow();
    assert_eq!(losses.len(), 40);
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(losses[39] < losses[0], "loss went from {} to {}", losses[0], losses[39]);
}

#[test]
fn test_batch_size_grows_to_the_cap() {
    let mut model = toy_config().build(toy_table()).unwrap();
    let (x, y) = preprocess(&toy_examples(), 2);
    let config = TrainConfig {
        min_batch_size: 2,
        max_batch_size: 4,
        batch_growth: 1.5,
        ..quiet_config(2, 2)
    };
    let mut trainer = Trainer::begin_training(model.as_mut(), &x, &y, config).unwrap();
    let stats = train_loop(model.as_mut(), &mut trainer, &x, &y, None).unwrap().unwrap();
    assert_eq!(stats.batch_size, 4);
    assert_eq!(stats.dev_accuracy, None);
}

#[test]
fn test_first_batch_uses_the_minimum_size() {
    let mut model = toy_config().build(toy_table()).unwrap();
    let (x, y) = preprocess(&toy_examples(), 2);
    let config = TrainConfig {
        min_batch_size: 1,
        max_batch_size: 100,
        batch_growth: 2.0,
        ..quiet_config(1, 1)
    };
    let mut trainer = Trainer::begin_training(model.as_mut(), &x, &y, config).unwrap();
    let stats = train_loop(model.as_mut(), &mut trainer, &x, &y, None).unwrap().unwrap();
    // Batches of 1, 1, 2, 4 and the remaining 4 of the 12 rows.
    assert_eq!(trainer.optimizer.nr_iter(), 5);
    assert_eq!(stats.batch_size, 8);
}

#[test]
fn test_dropout_decays_with_updates() {
    let mut model = toy_config().build(toy_table()).unwrap();
    let (x, y) = preprocess(&toy_examples(), 2);
    let config = TrainConfig { dropout: 0.4, dropout_decay: 0.5, ..quiet_config(1, 6) };
    let mut trainer = Trainer::begin_training(model.as_mut(), &x, &y, config).unwrap();
    let stats = train_loop(model.as_mut(), &mut trainer, &x, &y, None).unwrap().unwrap();
    // Two batches: 0.4 / (1 + 0.5 * 2)
    assert!((stats.dropout - 0.2).abs() < 1e-12);
}

#[test]
fn test_stop_flag_halts_before_first_epoch() {
    let mut model = toy_config().build(toy_table()).unwrap();
    let (x, y) = preprocess(&toy_examples(), 2);
    let config = TrainConfig { stop_flag: Some(Arc::new(AtomicBool::new(true))), ..quiet_config(5, 4) };
    let mut trainer = Trainer::begin_training(model.as_mut(), &x, &y, config).unwrap();
    assert!(train_loop(model.as_mut(), &mut trainer, &x, &y, None).unwrap().is_none());
}

#[test]
fn test_progress_channel_gets_one_message_per_epoch() {
    let mut model = toy_config().build(toy_table()).unwrap();
    let (x, y) = preprocess(&toy_examples(), 2);
    let (tx, rx) = mpsc::channel();
    let config = TrainConfig { progress_tx: Some(tx), ..quiet_config(3, 4) };
    let mut trainer = Trainer::begin_training(model.as_mut(), &x, &y, config).unwrap();
    train_loop(model.as_mut(), &mut trainer, &x, &y, Some((&x, &y))).unwrap();
    drop(trainer);

    let epochs: Vec<usize> = rx.iter().map(|s| s.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3]);
}

#[test]
fn test_mismatched_labels_are_rejected() {
    let mut model = toy_config().build(toy_table()).unwrap();
    let (x, _) = preprocess(&toy_examples(), 2);
    let short = Matrix::zeros(3, 2);
    assert!(Trainer::begin_training(model.as_mut(), &x, &short, quiet_config(1, 4)).is_err());
}

#[test]
fn test_evaluate_matches_argmax() {
    let (model, _, x, y) = setup(1);
    let acc = evaluate(model.as_ref(), &x, &y).unwrap();
    assert!((0.0..=1.0).contains(&acc));
    assert_eq!(evaluate(model.as_ref(), &x.slice(0..0), &y.slice_rows(0..0)).unwrap(), 0.0);
}

#[test]
fn test_averaged_params_are_swapped_back() {
    let (mut model, mut trainer, x, y) = setup(3);
    train_loop(model.as_mut(), &mut trainer, &x, &y, None).unwrap();

    let averages = trainer.optimizer.averages().unwrap();
    let mut before = Vec::new();
    model.visit_params(&mut |_, w| before.push(w.clone()));
    let averaged = use_params(model.as_mut(), averages, |m| {
        let mut seen = Vec::new();
        m.visit_params(&mut |_, w| seen.push(w.clone()));
        seen
    });
    let mut after = Vec::new();
    model.visit_params(&mut |_, w| after.push(w.clone()));

    assert_ne!(averaged, before);
    assert_eq!(after, before);
}

#[test]
fn test_saved_model_predicts_the_same() {
    let (mut model, mut trainer, x, y) = setup(2);
    train_loop(model.as_mut(), &mut trainer, &x, &y, None).unwrap();
    let expected = model.predict(&x).unwrap().into_floats("test").unwrap();

    let metadata = ModelMetadata {
        description: Some("toy".into()),
        labels: Some(vec!["different".into(), "duplicate".into()]),
        vectors: None,
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    SavedModel::capture(&toy_config(), metadata.clone(), model.as_mut()).save_json(&path).unwrap();

    let loaded = SavedModel::load_json(&path).unwrap();
    assert_eq!(loaded.config, toy_config());
    assert_eq!(loaded.metadata, metadata);
    let restored = loaded.restore(toy_table()).unwrap();
    let got = restored.predict(&x).unwrap().into_floats("test").unwrap();
    for (a, b) in got.data.iter().flatten().zip(expected.data.iter().flatten()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn test_restore_rejects_different_architecture() {
    let (mut model, _, _, _) = setup(1);
    let saved = SavedModel::capture(&toy_config(), ModelMetadata::default(), model.as_mut());
    let wider = SavedModel { config: PairModelConfig { width: 8, ..toy_config() }, ..saved };
    assert!(wider.restore(toy_table()).is_err());
}

#[test]
fn test_restore_rejects_different_depth() {
    let (mut model, _, _, _) = setup(1);
    let saved = SavedModel::capture(&toy_config(), ModelMetadata::default(), model.as_mut());
    let deeper = SavedModel { config: PairModelConfig { depth: 2, ..toy_config() }, ..saved };
    assert!(deeper.restore(toy_table()).is_err());
}

#[test]
fn test_sgd_with_zero_rate_leaves_weights_alone() {
    let (mut model, _, x, y) = setup(1);
    let mut before = Vec::new();
    model.visit_params(&mut |_, w| before.push(w.clone()));
    let mut sgd = Sgd::new(0.0);
    let losses: Vec<f64> = pairwise_nn::model::update(model.as_mut(), &x, &y, 4, &mut sgd)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(losses.len(), 3);
    let mut after = Vec::new();
    model.visit_params(&mut |_, w| after.push(w.clone()));
    assert_eq!(after, before);
}
