//! End-to-end epoch loop tests on a tiny synthetic classifier

use arutala_train::{DataLoader, ImageFolder, LoaderMode, TrainConfig, Trainer, TrainerOptions};
use arutala_vision::{DeviceType, PretrainedConfig, Transform};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder, VarMap};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

/// Per-channel mean, a learnable channel scale, then a linear head
struct TinyNet {
    scale: Tensor,
    head: Linear,
}

impl TinyNet {
    fn new(vb: VarBuilder) -> candle_core::Result<Self> {
        let scale = vb.get_with_hints(3, "stem.scale", Init::Const(1.0))?;
        let head = candle_nn::linear(3, 2, vb.pp("head").pp("fc"))?;
        Ok(Self { scale, head })
    }
}

impl Module for TinyNet {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let pooled = xs.flatten_from(2)?.mean(2)?;
        self.head.forward(&pooled.broadcast_mul(&self.scale)?)
    }
}

fn write_class(root: &Path, class: &str, color: [u8; 3], count: usize) {
    let dir = root.join(class);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        RgbImage::from_pixel(10, 10, Rgb(color))
            .save(dir.join(format!("{}.png", i)))
            .unwrap();
    }
}

struct Fixture {
    _data: tempfile::TempDir,
    train: ImageFolder,
    val: ImageFolder,
    transform: Transform,
}

fn two_class_fixture() -> Fixture {
    let data = tempfile::tempdir().unwrap();
    let train_dir = data.path().join("train");
    let val_dir = data.path().join("test");
    write_class(&train_dir, "blue", [0, 0, 255], 4);
    write_class(&train_dir, "red", [255, 0, 0], 4);
    write_class(&val_dir, "blue", [0, 0, 200], 2);
    write_class(&val_dir, "red", [200, 0, 0], 2);

    let train = ImageFolder::open(&train_dir).unwrap();
    let val = ImageFolder::open_with_classes(&val_dir, train.classes()).unwrap();
    let transform = Transform::from_pretrained(&PretrainedConfig {
        input_size: [3, 8, 8],
        crop_pct: 1.0,
        ..Default::default()
    });

    Fixture {
        _data: data,
        train,
        val,
        transform,
    }
}

fn options(epochs: usize, save_dir: &Path) -> TrainerOptions {
    TrainerOptions {
        epochs,
        learning_rate: 1e-2,
        weight_decay: 1e-3,
        use_amp: true,
        model_save_dir: save_dir.to_path_buf(),
        trainable_prefix: None,
    }
}

fn tiny_trainer(options: TrainerOptions) -> Trainer<TinyNet> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = TinyNet::new(vb).unwrap();
    Trainer::new(model, varmap, options).unwrap()
}

fn checkpoint_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_one_epoch_writes_single_checkpoint() {
    let fixture = two_class_fixture();
    let out = tempfile::tempdir().unwrap();
    let save_dir = out.path().join("models");

    let train = DataLoader::new(&fixture.train, &fixture.transform, 3, LoaderMode::Train, &Device::Cpu);
    let val = DataLoader::new(&fixture.val, &fixture.transform, 3, LoaderMode::Eval, &Device::Cpu);
    let mut trainer = tiny_trainer(options(1, &save_dir));
    let mut rng = StdRng::seed_from_u64(42);

    let result = trainer.fit(&train, &val, &mut rng).unwrap();

    assert_eq!(result.epochs(), 1);
    assert_eq!(result.train_loss.len(), 1);
    assert_eq!(result.val_loss.len(), 1);
    assert_eq!(result.val_accuracy.len(), 1);
    assert_eq!(result.learning_rate, vec![1e-2]);
    assert!(result.train_loss[0].is_finite());
    assert!((0.0..=1.0).contains(&result.val_accuracy[0]));

    assert_eq!(checkpoint_names(&save_dir), vec!["model-0.safetensors"]);
    let saved = candle_core::safetensors::load(save_dir.join("model-0.safetensors"), &Device::Cpu)
        .unwrap();
    assert!(saved.contains_key("stem.scale"));
    assert!(saved.contains_key("head.fc.weight"));
    assert!(saved.contains_key("head.fc.bias"));
}

#[test]
fn test_learning_rate_follows_cosine_schedule() {
    let fixture = two_class_fixture();
    let out = tempfile::tempdir().unwrap();

    let train = DataLoader::new(&fixture.train, &fixture.transform, 4, LoaderMode::Train, &Device::Cpu);
    let val = DataLoader::new(&fixture.val, &fixture.transform, 4, LoaderMode::Eval, &Device::Cpu);
    let mut trainer = tiny_trainer(options(3, out.path()));
    let mut rng = StdRng::seed_from_u64(1);

    let result = trainer.fit(&train, &val, &mut rng).unwrap();

    let expected: Vec<f64> = (0..3)
        .map(|t| 1e-2 * (1.0 + (std::f64::consts::PI * t as f64 / 3.0).cos()) / 2.0)
        .collect();
    for (lr, want) in result.learning_rate.iter().zip(&expected) {
        assert!((lr - want).abs() < 1e-12);
    }
    assert!(trainer.learning_rate().abs() < 1e-12);
    assert_eq!(
        checkpoint_names(out.path()),
        vec!["model-0.safetensors", "model-1.safetensors", "model-2.safetensors"]
    );
}

#[test]
fn test_frozen_backbone_only_updates_head() {
    let fixture = two_class_fixture();
    let out = tempfile::tempdir().unwrap();

    let train = DataLoader::new(&fixture.train, &fixture.transform, 2, LoaderMode::Train, &Device::Cpu);
    let val = DataLoader::new(&fixture.val, &fixture.transform, 2, LoaderMode::Eval, &Device::Cpu);
    let mut trainer = tiny_trainer(TrainerOptions {
        trainable_prefix: Some("head.fc".to_string()),
        ..options(1, out.path())
    });

    let head_before = trainer.model().head.weight().flatten_all().unwrap().to_vec1::<f32>().unwrap();

    let mut rng = StdRng::seed_from_u64(3);
    trainer.fit(&train, &val, &mut rng).unwrap();

    let scale_after = trainer.model().scale.to_vec1::<f32>().unwrap();
    let head_after = trainer.model().head.weight().flatten_all().unwrap().to_vec1::<f32>().unwrap();

    assert_eq!(scale_after, vec![1.0, 1.0, 1.0]);
    assert_ne!(head_before, head_after);
}

#[test]
fn test_validation_does_not_update_parameters() {
    let fixture = two_class_fixture();
    let out = tempfile::tempdir().unwrap();

    let val = DataLoader::new(&fixture.val, &fixture.transform, 2, LoaderMode::Eval, &Device::Cpu);
    let trainer = tiny_trainer(options(1, out.path()));
    let before = trainer.model().head.weight().flatten_all().unwrap().to_vec1::<f32>().unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    let (loss, accuracy) = trainer.val_step(&val, &mut rng).unwrap();
    let after = trainer.model().head.weight().flatten_all().unwrap().to_vec1::<f32>().unwrap();

    assert!(loss.is_finite());
    assert!((0.0..=1.0).contains(&accuracy));
    assert_eq!(before, after);
}

#[test]
fn test_training_without_loss_scaling() {
    let fixture = two_class_fixture();
    let out = tempfile::tempdir().unwrap();

    let train = DataLoader::new(&fixture.train, &fixture.transform, 8, LoaderMode::Train, &Device::Cpu);
    let mut trainer = tiny_trainer(TrainerOptions {
        use_amp: false,
        ..options(1, out.path())
    });
    assert!(!trainer.scaler().is_enabled());

    let mut rng = StdRng::seed_from_u64(9);
    let loss = trainer.train_step(&train, &mut rng).unwrap();
    assert!(loss.is_finite() && loss > 0.0);
}

#[test]
fn test_no_trainable_parameters_is_rejected() {
    let out = tempfile::tempdir().unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = TinyNet::new(vb).unwrap();

    let result = Trainer::new(
        model,
        varmap,
        TrainerOptions {
            trainable_prefix: Some("classifier".to_string()),
            ..options(1, out.path())
        },
    );
    assert!(result.is_err());
}

/// timm v1 layout ConvNeXt-atto checkpoint with no GRN tensors
fn write_atto_checkpoint(dir: &Path) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    candle_transformers::models::convnext::convnext(
        &candle_transformers::models::convnext::Config::atto(),
        1000,
        vb,
    )
    .unwrap();

    let tensors: std::collections::HashMap<String, Tensor> = varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .filter(|(name, _)| !name.contains(".grn."))
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect();
    candle_core::safetensors::save(&tensors, dir.join("model.safetensors")).unwrap();

    std::fs::write(
        dir.join("config.json"),
        r#"{"architecture": "convnext_atto", "num_classes": 1000,
            "pretrained_cfg": {"input_size": [3, 64, 64], "crop_pct": 1.0}}"#,
    )
    .unwrap();
}

#[test]
fn test_run_fine_tunes_convnext_checkpoint() {
    let root = tempfile::tempdir().unwrap();
    let model_dir = root.path().join("convnext_atto");
    std::fs::create_dir_all(&model_dir).unwrap();
    write_atto_checkpoint(&model_dir);

    let train_dir = root.path().join("train");
    let val_dir = root.path().join("test");
    write_class(&train_dir, "blue", [0, 0, 255], 2);
    write_class(&train_dir, "red", [255, 0, 0], 2);
    write_class(&val_dir, "blue", [0, 0, 200], 1);
    write_class(&val_dir, "red", [200, 0, 0], 1);

    let save_dir = root.path().join("models");
    let config = TrainConfig {
        model_path: model_dir.to_string_lossy().to_string(),
        batch_size: 2,
        epochs: 1,
        learning_rate: 1e-3,
        train_dir,
        val_dir,
        device: DeviceType::Cpu,
        model_save_dir: save_dir.clone(),
        seed: Some(0),
        ..Default::default()
    };

    let result = arutala_train::run(&config).unwrap();
    assert_eq!(result.epochs(), 1);
    assert!(result.train_loss[0].is_finite());
    assert!(result.val_loss[0].is_finite());

    assert_eq!(checkpoint_names(&save_dir), vec!["model-0.safetensors"]);
    let saved = candle_core::safetensors::load(save_dir.join("model-0.safetensors"), &Device::Cpu)
        .unwrap();
    assert!(saved.keys().all(|name| !name.contains(".grn.")));
    assert!(saved.contains_key("stem.0.weight"));
    assert_eq!(saved["head.fc.weight"].dims(), &[2, 320]);
}
