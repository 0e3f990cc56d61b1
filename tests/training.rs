use dagnet::{
  Layer, Network, Execution, Tensor, Trainer, LearningConfig, UpdateMethod,
  layer::{ Dense, Sigmoid, Softmax },
  cost::CrossEntropy,
  dataset::{ self, PairSet, TensorSet },
  marshal::{ self, Registry },
};


// Three well separated clusters on the unit circle with deterministic jitter
fn clusters(n: usize, phase: f64) -> TensorSet {
  let mut data = vec![];
  let mut answers = vec![];
  for i in 0..n {
    let class = i % 3;
    let angle = class as f64 * 2.0 * std::f64::consts::PI / 3.0;
    let jitter = 0.2 * ((i as f64 + phase) * 1.7).sin();
    let wobble = 0.2 * ((i as f64 + phase) * 2.3).cos();
    data.push(Tensor::vec(&[angle.cos() + jitter, angle.sin() + wobble]).unwrap());
    let mut answer = Tensor::zeros(&[3]).unwrap();
    answer.values_mut()[class] = 1.0;
    answers.push(answer);
  }
  TensorSet::new(data, answers).unwrap()
}

fn classifier(execution: Execution) -> Network {
  Network::sequential(vec![
    Box::new(Dense::new(2, 8)),
    Box::new(Sigmoid::new(&[8])),
    Box::new(Dense::new(8, 3)),
    Box::new(Softmax::new(&[3])),
  ]).unwrap().with_execution(execution)
}

fn config() -> LearningConfig {
  LearningConfig {
    method: UpdateMethod::Momentum,
    learning_rate_start: 0.5,
    learning_rate_end: 0.1,
    epochs: 30,
    batch_size: 12,
    momentum: 0.9,
    ..Default::default()
  }
}

fn train(execution: Execution) -> Trainer {
  dagnet::seed(1234);
  let data = PairSet::new(clusters(60, 0.0), clusters(30, 0.5));
  let mut trainer = Trainer::new(
    config(), Box::new(classifier(execution)), Box::new(CrossEntropy::new(&[3])), data);
  trainer.train().unwrap();
  trainer
}

#[test]
fn converges() {
  let mut trainer = train(Execution::Concurrent);
  let (accuracy, loss) = trainer.test().unwrap();
  assert!(accuracy >= 0.9, "accuracy {accuracy}");
  assert!(loss < 0.5, "loss {loss}");
}

#[test]
fn execution_modes_train_alike() {
  let probe = Tensor::vec(&[0.3, -0.2]).unwrap();
  let mut concurrent = train(Execution::Concurrent).into_network();
  let mut sequential = train(Execution::Sequential).into_network();
  let a = concurrent.activate(&probe).unwrap();
  let b = sequential.activate(&probe).unwrap();
  for (a, b) in a.values().iter().zip(b.values()) {
    assert!((a - b).abs() < 1e-9);
  }
}

#[test]
fn trained_network_survives_reload() {
  let mut net = train(Execution::Concurrent).into_network();
  let path = std::env::temp_dir().join(format!("dagnet-{}.bin", net.id()));
  marshal::save(net.as_ref(), &path).unwrap();
  let mut restored = marshal::load(&path, &Registry::standard()).unwrap();
  std::fs::remove_file(&path).unwrap();

  let test = clusters(30, 0.5);
  let before = dataset::accuracy(net.as_mut(), &test).unwrap();
  let after = dataset::accuracy(restored.as_mut(), &test).unwrap();
  assert_eq!(before, after);
  let probe = Tensor::vec(&[-0.5, 0.8]).unwrap();
  let a = net.activate(&probe).unwrap();
  let b = restored.activate(&probe).unwrap();
  for (a, b) in a.values().iter().zip(b.values()) {
    assert!((a - b).abs() < 1e-8);
  }
}
