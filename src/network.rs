use std::{
  collections::HashMap,
  sync::mpsc::{ self, Receiver, SyncSender },
  thread,
};

use serde::{ Serialize, Deserialize };
use itertools::Itertools;

pub mod blocks;

use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  layer::{ Layer, ParamGrad },
  marshal::{ self, Archive, Registry },
  debug::LayerInfo,
  internal,
};


/// How a [Network] schedules its nodes during a pass.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Execution {
  /// One thread per node, connected by single slot channels along every edge.
  #[default]
  Concurrent,
  /// All nodes on the calling thread, in insertion order.
  Sequential,
}


#[derive(Debug)]
struct Node {
  layer: Box<dyn Layer>,
  parents: Vec<usize>,
  children: Vec<usize>,
}


/// Directed acyclic graph of layers.
///
/// The first layer added is the source and receives the network's input.
/// Every later layer names at least one existing parent and receives the sum
/// of its parents' outputs. After [end](Network::end) the most recently
/// added layer is the sink whose output is the network's output. Gradients
/// flow the same edges in reverse, summed wherever branches merge.

#[derive(Debug)]
pub struct Network {
  id: String,
  nodes: Vec<Node>,
  finished: bool,
  execution: Execution,
}

impl Network {
  pub const KIND: &'static str = "network";

  /// Parent records are re-inserted for at most this many rounds when loading.
  pub const MAX_ROUNDS: usize = 1000;

  pub fn new() -> Self {
    Self {
      id: internal::random_id("Network"),
      nodes: vec![],
      finished: false,
      execution: Execution::default(),
    }
  }

  /// Chain `layers`, each one feeding the next.

  pub fn sequential(layers: Vec<Box<dyn Layer>>) -> Result<Self> {
    let mut network = Self::new();
    let mut previous: Option<String> = None;
    for layer in layers {
      let id = layer.id().to_string();
      match &previous {
        Some(parent) => network.add(layer, &[parent.as_str()])?,
        None => network.add(layer, &[])?,
      }
      previous = Some(id);
    }
    network.end()?;
    Ok(network)
  }

  pub fn with_execution(mut self, execution: Execution) -> Self {
    self.execution = execution;
    self
  }

  pub fn set_execution(&mut self, execution: Execution) {
    self.execution = execution;
  }

  pub fn execution(&self) -> Execution {
    self.execution
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn layer(&self, id: &str) -> Option<&dyn Layer> {
    self.position(id).map(|i| self.nodes[i].layer.as_ref() )
  }

  pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
    self.nodes.iter().map(|node| node.layer.as_ref() )
  }

  /// IDs of the parents of layer `id`.

  pub fn parents(&self, id: &str) -> Option<Vec<&str>> {
    self.position(id).map(|i| {
      self.nodes[i].parents.iter().map(|&p| self.nodes[p].layer.id() ).collect()
    })
  }

  fn position(&self, id: &str) -> Option<usize> {
    self.nodes.iter().position(|node| node.layer.id() == id )
  }

  pub fn add_layer(&mut self, layer: impl Layer + 'static, parents: &[&str]) -> Result<()> {
    self.add(Box::new(layer), parents)
  }

  /// Insert `layer` below the layers with IDs `parents`.
  ///
  /// The first layer takes no parents, all later ones need at least one.

  pub fn add(&mut self, layer: Box<dyn Layer>, parents: &[&str]) -> Result<()> {
    if self.finished {
      return Err(Error::State(format!("{} is finished, cannot add {}", self.id, layer.id())))
    }
    if self.position(layer.id()).is_some() {
      return Err(Error::Config(format!("{} already contains a layer {}", self.id, layer.id())))
    }
    if !self.nodes.is_empty() && parents.is_empty() {
      return Err(Error::Config(format!("{} needs at least one parent", layer.id())))
    }
    let indices = parents.iter()
      .map(|&parent| self.position(parent)
        .ok_or_else(|| Error::NotFound(format!("no parent {parent} for {}", layer.id())) ))
      .collect::<Result<Vec<_>>>()?;
    if indices.iter().duplicates().next().is_some() {
      return Err(Error::Config(format!("{} lists a parent twice", layer.id())))
    }
    for &p in &indices {
      let parent = &self.nodes[p].layer;
      if parent.output_shape() != layer.input_shape() {
        return Err(Error::Shape(format!("{} outputs {:?} but {} takes {:?}",
          parent.id(), parent.output_shape(), layer.id(), layer.input_shape())))
      }
    }
    let index = self.nodes.len();
    for &p in &indices {
      self.nodes[p].children.push(index);
    }
    self.nodes.push(Node { layer, parents: indices, children: vec![] });
    Ok(())
  }

  /// Finish construction. The most recently added layer becomes the sink.

  pub fn end(&mut self) -> Result<()> {
    if self.finished {
      return Err(Error::State(format!("{} is already finished", self.id)))
    }
    if self.nodes.is_empty() {
      return Err(Error::Config(format!("{} has no layers", self.id)))
    }
    let last = self.nodes.len() - 1;
    if let Some(node) = self.nodes[..last].iter().find(|node| node.children.is_empty() ) {
      return Err(Error::Config(format!("{} never reaches the output of {}", node.layer.id(), self.id)))
    }
    self.finished = true;
    Ok(())
  }

  fn check_finished(&self) -> Result<()> {
    if !self.finished {
      return Err(Error::State(format!("{} has to be finished with end() before use", self.id)))
    }
    Ok(())
  }

  fn run(&mut self, seed: &Tensor, pass: Pass) -> Result<Tensor> {
    self.check_finished()?;
    match self.execution {
      Execution::Concurrent => self.run_concurrent(seed, pass),
      Execution::Sequential => self.run_sequential(seed, pass),
    }
  }

  fn run_sequential(&mut self, seed: &Tensor, pass: Pass) -> Result<Tensor> {
    let n = self.nodes.len();
    let mut pending: Vec<Option<Tensor>> = vec![None; n];
    let (first, last) = pass.orient(0, n - 1);
    pending[first] = Some(seed.clone());
    let order: Vec<usize> = match pass {
      Pass::Forward => (0..n).collect(),
      Pass::Backward => (0..n).rev().collect(),
    };
    for i in order {
      let input = pending[i].take()
        .ok_or_else(|| Error::Interrupted(self.nodes[i].layer.id().to_string()) )?;
      let output = pass.apply(self.nodes[i].layer.as_mut(), &input)?;
      if i == last { return Ok(output) }
      let targets = match pass {
        Pass::Forward => &self.nodes[i].children,
        Pass::Backward => &self.nodes[i].parents,
      };
      for &t in targets {
        match &mut pending[t] {
          Some(total) => total.add(&[&output])?,
          slot => *slot = Some(output.clone()),
        }
      }
    }
    Err(Error::Interrupted(self.id.clone()))
  }

  fn run_concurrent(&mut self, seed: &Tensor, pass: Pass) -> Result<Tensor> {
    let n = self.nodes.len();
    let mut inbound: Vec<Vec<Receiver<Tensor>>> = (0..n).map(|_| vec![] ).collect();
    let mut outbound: Vec<Vec<SyncSender<Tensor>>> = (0..n).map(|_| vec![] ).collect();
    for (i, node) in self.nodes.iter().enumerate() {
      for &p in &node.parents {
        let (tx, rx) = mpsc::sync_channel(1);
        let (from, to) = pass.orient(p, i);
        outbound[from].push(tx);
        inbound[to].push(rx);
      }
    }
    let (first, last) = pass.orient(0, n - 1);
    let (entry, entry_rx) = mpsc::sync_channel(1);
    inbound[first].push(entry_rx);
    let (exit_tx, exit) = mpsc::sync_channel(1);
    outbound[last].push(exit_tx);

    let id = &self.id;
    thread::scope(|s| {
      let handles: Vec<_> = self.nodes.iter_mut()
        .zip(inbound)
        .zip(outbound)
        .map(|((node, inbound), outbound)| {
          let layer = node.layer.as_mut();
          s.spawn(move || run_node(layer, pass, inbound, outbound) )
        })
        .collect();

      // The entry slot is empty, so this never blocks
      let _ = entry.send(seed.clone());
      drop(entry);
      let result = exit.recv();

      let mut failure: Option<Error> = None;
      for handle in handles {
        match handle.join() {
          Ok(Ok(())) => {},
          // Report the cause rather than the nodes it interrupted
          Ok(Err(err)) => {
            let replace = match &failure {
              None => true,
              Some(Error::Interrupted(_)) => !matches!(err, Error::Interrupted(_)),
              Some(_) => false,
            };
            if replace { failure = Some(err) }
          },
          Err(panic) => std::panic::resume_unwind(panic),
        }
      }
      match (result, failure) {
        (_, Some(err)) => Err(err),
        (Ok(output), None) => Ok(output),
        (Err(_), None) => Err(Error::Interrupted(id.clone())),
      }
    })
  }

  pub fn unmarshal(archive: &Archive, registry: &Registry) -> Result<Box<dyn Layer>> {
    let info: NetworkInfo = archive.info()?;
    let records: Vec<(String, Vec<String>)> = archive.value("parents")?;

    let mut layers: HashMap<String, Box<dyn Layer>> = HashMap::new();
    for entry in archive.entries().iter().filter(|e| e.name != "info" && e.name != "parents" ) {
      let (id, kind) = marshal::split_name(&entry.name)?;
      let layer = registry.unmarshal(kind, &Archive::from_bytes(&entry.bytes)?)?;
      layers.insert(id.to_string(), layer);
    }

    let (sink, rest) = records.split_last()
      .ok_or_else(|| Error::NotFound(format!("{} has no layers", info.id)) )?;
    let mut network = Network { id: info.id, execution: info.execution, ..Network::new() };
    let mut insert = |network: &mut Network, (id, parents): &(String, Vec<String>)| -> Result<()> {
      let layer = layers.remove(id)
        .ok_or_else(|| Error::NotFound(format!("no stored layer {id}")) )?;
      let parents: Vec<&str> = parents.iter().map(|p| p.as_str() ).collect();
      network.add(layer, &parents)
    };

    // Insert every node once all its parents are present
    let mut pending: Vec<&(String, Vec<String>)> = rest.iter().collect();
    let mut rounds = 0;
    while !pending.is_empty() {
      rounds += 1;
      if rounds > Self::MAX_ROUNDS {
        return Err(Error::NotFound(format!("cannot resolve parents of {}",
          pending.iter().map(|(id, _)| id ).join(", "))))
      }
      let mut waiting = vec![];
      for record in pending {
        if record.1.iter().all(|p| network.position(p).is_some() ) {
          insert(&mut network, record)?;
        } else {
          waiting.push(record);
        }
      }
      pending = waiting;
    }
    insert(&mut network, sink)?;
    network.end()?;
    Ok(Box::new(network))
  }
}

impl Default for Network {
  fn default() -> Self {
    Self::new()
  }
}

impl Layer for Network {
  fn id(&self) -> &str { &self.id }
  fn kind(&self) -> &'static str { Self::KIND }

  fn input_shape(&self) -> &[usize] {
    self.nodes.first().map(|node| node.layer.input_shape() ).unwrap_or(&[])
  }

  fn output_shape(&self) -> &[usize] {
    self.nodes.last().map(|node| node.layer.output_shape() ).unwrap_or(&[])
  }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.run(input, Pass::Forward)
  }

  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.run(grad, Pass::Backward)
  }

  fn enslave(&self) -> Box<dyn Layer> {
    Box::new(Self {
      id: self.id.clone(),
      nodes: self.nodes.iter().map(|node| Node {
        layer: node.layer.enslave(),
        parents: node.parents.clone(),
        children: node.children.clone(),
      }).collect(),
      finished: self.finished,
      execution: self.execution,
    })
  }

  fn param_grads(&mut self) -> Vec<ParamGrad<'_>> {
    self.nodes.iter_mut()
      .flat_map(|node| node.layer.param_grads() )
      .collect()
  }

  fn marshal(&self) -> Result<Archive> {
    self.check_finished()?;
    let mut archive = Archive::new();
    archive.put_info(&NetworkInfo { id: self.id.clone(), execution: self.execution })?;
    let records: Vec<(String, Vec<String>)> = self.nodes.iter().map(|node| (
      node.layer.id().to_string(),
      node.parents.iter().map(|&p| self.nodes[p].layer.id().to_string() ).collect(),
    )).collect();
    archive.put_value("parents", &records)?;
    for node in &self.nodes {
      archive.put_archive(&marshal::entry_name(node.layer.as_ref()), &node.layer.marshal()?)?;
    }
    Ok(archive)
  }

  fn debug_info(&self) -> Vec<LayerInfo> {
    self.nodes.iter()
      .flat_map(|node| node.layer.debug_info() )
      .collect()
  }
}


#[derive(Debug, Serialize, Deserialize)]
struct NetworkInfo {
  id: String,
  execution: Execution,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
  Forward,
  Backward,
}

impl Pass {
  // Direction of data along the edge from `parent` to `child`
  fn orient(self, parent: usize, child: usize) -> (usize, usize) {
    match self {
      Pass::Forward => (parent, child),
      Pass::Backward => (child, parent),
    }
  }

  fn apply(self, layer: &mut dyn Layer, input: &Tensor) -> Result<Tensor> {
    match self {
      Pass::Forward => layer.activate(input),
      Pass::Backward => layer.back_propagate(input),
    }
  }
}

// Body of one node's task: wait for all inbound values, sum them,
// run the layer and hand the result to every outbound edge.
fn run_node(
  layer: &mut dyn Layer,
  pass: Pass,
  inbound: Vec<Receiver<Tensor>>,
  outbound: Vec<SyncSender<Tensor>>,
) -> Result<()> {
  let id = layer.id().to_string();
  let interrupted = || Error::Interrupted(id.clone());
  let mut total: Option<Tensor> = None;
  for rx in inbound {
    let value = rx.recv().map_err(|_| interrupted() )?;
    match &mut total {
      Some(total) => total.add(&[&value])?,
      slot => *slot = Some(value),
    }
  }
  let total = total.ok_or_else(interrupted)?;
  let output = pass.apply(layer, &total)?;
  for tx in outbound {
    tx.send(output.clone()).map_err(|_| interrupted() )?;
  }
  Ok(())
}
