use std::{
  sync::mpsc::{ self, SyncSender },
  thread::{ self, JoinHandle },
};

use serde::{ Serialize, Deserialize };

use crate::tensor::Stats;


/// Introspection snapshot of one layer.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
  pub id: String,
  pub kind: String,
  pub weights: Option<Stats>,
  pub bias: Option<Stats>,
  pub output: Option<Stats>,
  pub propagation: Option<Stats>,
}


/// Progress of the training loop, averaged since the last report.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainInfo {
  pub epoch: usize,
  pub epochs: usize,
  pub batch: usize,
  pub batches: usize,
  pub loss: f64,
  pub accuracy: f64,
  pub learning_rate: f64,
  /// Examples per second
  pub speed: f64,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
  pub epoch: usize,
  pub loss: f64,
  pub accuracy: f64,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugEvent {
  Status(String),
  Layers(Vec<LayerInfo>),
  Train(TrainInfo),
  Test(TestInfo),
}


/// Receiver of observability events.
///
/// A debugger runs on its own thread while training and is handed
/// back to the caller afterwards.

pub trait Debugger: Send {
  fn handle(&mut self, event: DebugEvent);
}

impl<F: FnMut(DebugEvent) + Send> Debugger for F {
  fn handle(&mut self, event: DebugEvent) {
    self(event)
  }
}


/// Writes every event to the `log` facade.

#[derive(Debug, Clone, Default)]
pub struct LogDebugger;

impl Debugger for LogDebugger {
  fn handle(&mut self, event: DebugEvent) {
    match event {
      DebugEvent::Status(msg) => log::info!("{msg}"),
      DebugEvent::Layers(layers) => for layer in layers {
        log::info!("{} ({}): weights {:?} bias {:?} output {:?} propagation {:?}",
          layer.id, layer.kind, layer.weights, layer.bias, layer.output, layer.propagation);
      },
      DebugEvent::Train(info) => log::info!(
        "epoch {}/{} batch {}/{}: loss {:.5} accuracy {:.2}% rate {:.5} ({:.1} examples/s)",
        info.epoch + 1, info.epochs, info.batch + 1, info.batches,
        info.loss, info.accuracy * 100.0, info.learning_rate, info.speed),
      DebugEvent::Test(info) => log::info!(
        "epoch {} test: loss {:.5} accuracy {:.2}%", info.epoch + 1, info.loss, info.accuracy * 100.0),
    }
  }
}


/// Lossy emitter of debug events.
///
/// Events are dropped when the buffer is full, so emitting never blocks.

#[derive(Debug, Clone, Default)]
pub struct Monitor {
  sender: Option<SyncSender<DebugEvent>>,
}

impl Monitor {
  pub const CAPACITY: usize = 16;

  pub fn disabled() -> Self {
    Self { sender: None }
  }

  pub fn is_enabled(&self) -> bool {
    self.sender.is_some()
  }

  pub fn emit(&self, event: DebugEvent) {
    if let Some(sender) = &self.sender {
      // Full or disconnected buffers lose the event
      let _ = sender.try_send(event);
    }
  }

  pub fn status(&self, msg: impl Into<String>) {
    self.emit(DebugEvent::Status(msg.into()))
  }

  /// Run `debugger` on its own thread until every clone of the
  /// returned monitor is dropped.

  pub fn spawn(mut debugger: Box<dyn Debugger>) -> (Self, JoinHandle<Box<dyn Debugger>>) {
    let (sender, receiver) = mpsc::sync_channel(Self::CAPACITY);
    let handle = thread::spawn(move || {
      for event in receiver {
        debugger.handle(event);
      }
      debugger
    });
    (Self { sender: Some(sender) }, handle)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{ Arc, Mutex };

  #[test]
  fn forwards_events() {
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let (monitor, handle) = Monitor::spawn(Box::new(move |event: DebugEvent| sink.lock().unwrap().push(event) ));
    monitor.status("hello");
    monitor.emit(DebugEvent::Test(TestInfo { epoch: 0, loss: 0.5, accuracy: 0.9 }));
    drop(monitor);
    handle.join().unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], DebugEvent::Status("hello".into()));
  }

  #[test]
  fn never_blocks() {
    let (sender, receiver) = mpsc::sync_channel(Monitor::CAPACITY);
    let monitor = Monitor { sender: Some(sender) };
    // Nobody reads, so most events get dropped
    for i in 0..100 {
      monitor.status(format!("{i}"));
    }
    assert_eq!(receiver.try_iter().count(), Monitor::CAPACITY);
    assert!(!Monitor::disabled().is_enabled());
    Monitor::disabled().status("ignored");
  }
}
