use std::{
  panic,
  thread,
  time::{ Duration, Instant },
};

use serde::{ Serialize, Deserialize };

use crate::{
  error::{ Error, Result },
  layer::{ Layer, ParamGrad },
  cost::CostFunction,
  dataset::{ self, Dataset, PairSet },
  debug::{ Debugger, DebugEvent, Monitor, TrainInfo, TestInfo },
  optimize::{ Optimizer, Strategy, Momentum, AdaDelta, Adam },
};


/// Rule used to turn averaged gradients into parameter changes.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateMethod {
  #[default]
  Momentum,
  /// Ignores the learning rate schedule.
  AdaDelta,
  Adam,
}


/// Constants of the adaptive update rules.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
  pub epsilon: f64,
  pub rho: f64,
  pub beta1: f64,
  pub beta2: f64,
}

impl Default for Hyperparameters {
  fn default() -> Self {
    Self { epsilon: 1e-8, rho: 0.95, beta1: 0.9, beta2: 0.999 }
  }
}


/// Settings of one training run.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
  pub method: UpdateMethod,
  pub learning_rate_start: f64,
  pub learning_rate_end: f64,
  pub epochs: usize,
  pub batch_size: usize,
  pub weight_decay: f64,
  pub momentum: f64,
  pub hyper: Hyperparameters,
}

impl Default for LearningConfig {
  fn default() -> Self {
    Self {
      method: UpdateMethod::Momentum,
      learning_rate_start: 0.01,
      learning_rate_end: 0.001,
      epochs: 10,
      batch_size: 32,
      weight_decay: 0.0,
      momentum: 0.9,
      hyper: Hyperparameters::default(),
    }
  }
}

impl LearningConfig {
  pub fn validate(&self) -> Result<()> {
    if self.epochs == 0 {
      return Err(Error::Config("Training needs at least one epoch".into()))
    }
    if self.batch_size == 0 {
      return Err(Error::Config("Batch size has to be positive".into()))
    }
    let numbers = [
      ("learning_rate_start", self.learning_rate_start),
      ("learning_rate_end", self.learning_rate_end),
      ("weight_decay", self.weight_decay),
      ("momentum", self.momentum),
      ("epsilon", self.hyper.epsilon),
      ("rho", self.hyper.rho),
      ("beta1", self.hyper.beta1),
      ("beta2", self.hyper.beta2),
    ];
    if let Some((name, value)) = numbers.iter().find(|(_, v)| !v.is_finite() ) {
      return Err(Error::Config(format!("{name} has to be finite, got {value}")))
    }
    Ok(())
  }

  /// Exponential ease from the start to the end rate over `progress` in `[0, 1]`.

  pub fn learning_rate(&self, progress: f64) -> f64 {
    let (start, end) = (self.learning_rate_start, self.learning_rate_end);
    (end - start) * (1.0 - 2f64.powf(-10.0 * progress)) + start
  }

  pub fn strategy(&self) -> Box<dyn Strategy> {
    let hyper = &self.hyper;
    match self.method {
      UpdateMethod::Momentum => Box::new(Momentum::new(self.momentum)),
      UpdateMethod::AdaDelta => Box::new(AdaDelta::new(hyper.rho, hyper.epsilon)),
      UpdateMethod::Adam => Box::new(Adam::new(hyper.beta1, hyper.beta2, hyper.epsilon)),
    }
  }
}


// Loss and accuracy accumulated between two reports
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
  loss: f64,
  correct: usize,
  examples: usize,
}

impl Tally {
  fn merge(&mut self, other: Tally) {
    self.loss += other.loss;
    self.correct += other.correct;
    self.examples += other.examples;
  }
}


/// Back-propagation trainer running a batch on several workers at once.
///
/// Worker zero uses the network itself, the others use slaves sharing its
/// parameters. Gradients are merged and applied after every batch.

pub struct Trainer {
  config: LearningConfig,
  net: Box<dyn Layer>,
  cost: Box<dyn CostFunction>,
  data: PairSet,
  workers: usize,
  debugger: Option<Box<dyn Debugger>>,
}

impl Trainer {
  pub const DEFAULT_WORKERS: usize = 4;
  pub const REPORT_INTERVAL: Duration = Duration::from_secs(2);

  pub fn new(
    config: LearningConfig,
    net: Box<dyn Layer>,
    cost: Box<dyn CostFunction>,
    data: PairSet,
  ) -> Self {
    Self { config, net, cost, data, workers: Self::DEFAULT_WORKERS, debugger: None }
  }

  pub fn config(&self) -> &LearningConfig {
    &self.config
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  pub fn set_workers(&mut self, workers: usize) -> Result<()> {
    if workers == 0 {
      return Err(Error::Config("Training needs at least one worker".into()))
    }
    self.workers = workers;
    Ok(())
  }

  /// Receive progress events while training.

  pub fn set_debugger(&mut self, debugger: Box<dyn Debugger>) {
    self.debugger = Some(debugger);
  }

  pub fn take_debugger(&mut self) -> Option<Box<dyn Debugger>> {
    self.debugger.take()
  }

  pub fn network(&self) -> &dyn Layer {
    self.net.as_ref()
  }

  pub fn network_mut(&mut self) -> &mut dyn Layer {
    self.net.as_mut()
  }

  pub fn into_network(self) -> Box<dyn Layer> {
    self.net
  }

  pub fn data(&self) -> &PairSet {
    &self.data
  }

  /// Accuracy and mean loss on the test set.

  pub fn test(&mut self) -> Result<(f64, f64)> {
    dataset::evaluate(self.net.as_mut(), Some(self.cost.as_mut()), self.data.test.as_ref())
  }

  /// Run all configured epochs.
  ///
  /// Stops at the first error any worker reports. An attached debugger is
  /// handed back once training ends, successful or not.

  pub fn train(&mut self) -> Result<()> {
    self.config.validate()?;
    let batch_size = self.config.batch_size;
    if batch_size % self.workers != 0 {
      return Err(Error::Config(format!(
        "Batch size {batch_size} has to be divisible by the number of workers ({})", self.workers)))
    }
    let data_shape = self.data.train.data_shape();
    if data_shape != self.net.input_shape() {
      return Err(Error::Shape(format!(
        "Network expects {:?}, training data has {:?}", self.net.input_shape(), data_shape)))
    }
    let set_size = self.data.train.set_size();
    if set_size < batch_size {
      return Err(Error::Config(format!("Training set of {set_size} can't fill a batch of {batch_size}")))
    }
    if set_size % batch_size != 0 {
      log::warn!("Training set size {set_size} is not a multiple of batch size {batch_size}, dropping {} examples per epoch",
        set_size % batch_size);
    }

    let (monitor, handle) = match self.debugger.take() {
      Some(debugger) => {
        let (monitor, handle) = Monitor::spawn(debugger);
        (monitor, Some(handle))
      },
      None => (Monitor::disabled(), None),
    };
    let result = self.run(&monitor, set_size / batch_size);
    monitor.status(match &result {
      Ok(()) => "Finished".to_string(),
      Err(err) => format!("Training failed: {err}"),
    });
    drop(monitor);
    if let Some(handle) = handle {
      self.debugger = Some(handle.join().unwrap_or_else(|e| panic::resume_unwind(e) ));
    }
    result
  }

  fn run(&mut self, monitor: &Monitor, batches: usize) -> Result<()> {
    let LearningConfig { epochs, batch_size, .. } = self.config;
    let per_worker = batch_size / self.workers;
    let mut slaves: Vec<(Box<dyn Layer>, Box<dyn CostFunction>)> = (1..self.workers)
      .map(|_| (self.net.enslave(), self.cost.enslave()) )
      .collect();
    let mut optimizer = Optimizer::new(self.config.strategy(), self.config.weight_decay);
    let track = monitor.is_enabled();

    log::debug!("Training {} for {epochs} epochs of {batches} batches on {} workers",
      self.net.id(), self.workers);
    monitor.status(format!("Training with {} workers", self.workers));
    self.data.train.reset();

    let mut tally = Tally::default();
    let mut since = Instant::now();
    for epoch in 0..epochs {
      log::debug!("Starting epoch {}", epoch + 1);
      monitor.status(format!("Starting epoch {}/{epochs}", epoch + 1));
      for batch in 0..batches {
        let results = {
          let train = self.data.train.as_ref();
          let mut jobs = vec![(self.net.as_mut(), self.cost.as_mut())];
          jobs.extend(slaves.iter_mut().map(|(net, cost)| (net.as_mut(), cost.as_mut()) ));
          thread::scope(|s| {
            let handles: Vec<_> = jobs.into_iter()
              .map(|(net, cost)| s.spawn(move || run_worker(net, cost, train, per_worker, track) ))
              .collect();
            handles.into_iter()
              .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e) ))
              .collect::<Vec<_>>()
          })
        };
        for result in results {
          tally.merge(result?);
        }

        let progress = (batches * epoch + batch) as f64 / (batches * epochs) as f64;
        let rate = self.config.learning_rate(progress);

        if track && (since.elapsed() >= Self::REPORT_INTERVAL || batch + 1 == batches) {
          let examples = tally.examples.max(1) as f64;
          monitor.emit(DebugEvent::Layers(self.net.debug_info()));
          monitor.emit(DebugEvent::Train(TrainInfo {
            epoch,
            epochs,
            batch,
            batches,
            loss: tally.loss / examples,
            accuracy: tally.correct as f64 / examples,
            learning_rate: rate,
            speed: tally.examples as f64 / since.elapsed().as_secs_f64().max(1e-9),
          }));
          tally = Tally::default();
          since = Instant::now();
        }

        let mut grads: Vec<Vec<ParamGrad>> = vec![self.net.param_grads()];
        grads.extend(slaves.iter_mut().map(|(net, _)| net.param_grads() ));
        optimizer.minimize(&mut grads, batch_size, rate)?;
      }

      if track {
        monitor.status(format!("Testing epoch {}", epoch + 1));
        let (accuracy, loss) = self.test()?;
        monitor.emit(DebugEvent::Test(TestInfo { epoch, loss, accuracy }));
      }
      self.data.train.reset();
    }
    log::debug!("Training {} finished after {} updates", self.net.id(), optimizer.step() - 1);
    Ok(())
  }
}

impl std::fmt::Debug for Trainer {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.debug_struct("Trainer")
      .field("config", &self.config)
      .field("net", &self.net.id())
      .field("cost", &self.cost)
      .field("data", &self.data)
      .field("workers", &self.workers)
      .field("debugger", &self.debugger.is_some())
      .finish()
  }
}


// Forward and backward passes for one worker's share of the batch
fn run_worker(
  net: &mut dyn Layer,
  cost: &mut dyn CostFunction,
  data: &dyn Dataset,
  examples: usize,
  track: bool,
) -> Result<Tally> {
  let mut tally = Tally::default();
  for _ in 0..examples {
    let (input, answer) = data.next_set()?;
    let output = net.activate(&input)?;
    let loss = cost.cost(&output, &answer)?;
    if track {
      tally.loss += loss;
      tally.examples += 1;
      if data.is_correct(&output, &answer) { tally.correct += 1 }
    }
    net.back_propagate(&cost.back_propagate()?)?;
  }
  Ok(tally)
}
