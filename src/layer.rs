use std::sync::Arc;

use parking_lot::{ RwLock, RwLockReadGuard, RwLockWriteGuard };

pub mod dense;
pub mod convolutional;
pub mod pool;
pub mod relu;
pub mod sigmoid;
pub mod softmax;
pub mod reshaper;

pub use dense::Dense;
pub use convolutional::Convolutional;
pub use pool::Pool;
pub use relu::Relu;
pub use sigmoid::Sigmoid;
pub use softmax::Softmax;
pub use reshaper::Reshaper;

use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  marshal::Archive,
  debug::LayerInfo,
  internal,
};


/// A differentiable unit of computation.
///
/// Every layer maps an input tensor of fixed shape to an output tensor of
/// fixed shape. [back_propagate](Layer::back_propagate) may only be called
/// after [activate](Layer::activate) and turns the gradient of the output
/// into the gradient of the input, accumulating parameter gradients on the way.

pub trait Layer: std::fmt::Debug + Send {
  /// Unique identifier used to wire graph edges.
  fn id(&self) -> &str;

  /// Name this layer type is registered under for persistence.
  fn kind(&self) -> &'static str;

  fn input_shape(&self) -> &[usize];
  fn output_shape(&self) -> &[usize];

  fn activate(&mut self, input: &Tensor) -> Result<Tensor>;

  fn back_propagate(&mut self, _grad: &Tensor) -> Result<Tensor> {
    Err(Error::Type(format!("{} layers cannot back-propagate", self.kind())))
  }

  /// Create a worker copy that shares parameters with this layer
  /// but owns its gradient and scratch buffers.
  fn enslave(&self) -> Box<dyn Layer>;

  /// Trainable parameters paired with their gradient accumulators,
  /// bias before weights.
  fn param_grads(&mut self) -> Vec<ParamGrad<'_>> {
    vec![]
  }

  fn marshal(&self) -> Result<Archive>;

  fn debug_info(&self) -> Vec<LayerInfo>;
}


/// Handle to parameter storage that may be shared between a layer and its slaves.
///
/// Cloning a `Param` yields another handle to the same tensor.

#[derive(Debug, Clone)]
pub struct Param(Arc<RwLock<Tensor>>);

impl Param {
  pub fn new(tensor: Tensor) -> Self {
    Self(Arc::new(RwLock::new(tensor)))
  }

  pub fn read(&self) -> RwLockReadGuard<Tensor> {
    self.0.read()
  }

  pub fn write(&self) -> RwLockWriteGuard<Tensor> {
    self.0.write()
  }

  /// Overwrite the stored values. Shapes must match.

  pub fn assign(&self, tensor: &Tensor) -> Result<()> {
    let mut this = self.0.write();
    if this.shape() != tensor.shape() {
      return Err(Error::Shape(format!("Cannot assign {} to parameter of {}", tensor.shape(), this.shape())))
    }
    this.values_mut().copy_from_slice(tensor.values());
    Ok(())
  }

  pub fn shares_storage(&self, other: &Param) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}


/// A parameter and the gradient accumulated for it by one layer instance.

#[derive(Debug)]
pub struct ParamGrad<'a> {
  pub param: Param,
  pub grad: &'a mut Tensor,
}


// State every layer carries: identity, shapes and what is needed
// to run the backward pass.

#[derive(Debug, Clone)]
pub(crate) struct Base {
  pub id: String,
  pub input_shape: Vec<usize>,
  pub output_shape: Vec<usize>,
  pub input: Option<Tensor>,
  pub output: Option<Tensor>,
  pub propagation: Option<Tensor>,
}

impl Base {
  pub fn new(prefix: &str, input_shape: &[usize], output_shape: &[usize]) -> Self {
    Self::with_id(internal::random_id(prefix), input_shape, output_shape)
  }

  pub fn with_id(id: String, input_shape: &[usize], output_shape: &[usize]) -> Self {
    Self {
      id,
      input_shape: input_shape.to_vec(),
      output_shape: output_shape.to_vec(),
      input: None,
      output: None,
      propagation: None,
    }
  }

  /// Same identity and shapes, fresh scratch state.

  pub fn enslave(&self) -> Self {
    Self::with_id(self.id.clone(), &self.input_shape, &self.output_shape)
  }

  pub fn check_input(&self, input: &Tensor) -> Result<()> {
    if !input.has_shape(&self.input_shape) {
      return Err(Error::Shape(format!(
        "{} expects input of shape {:?}, got {:?}", self.id, self.input_shape, input.dims())))
    }
    Ok(())
  }

  pub fn check_grad(&self, grad: &Tensor) -> Result<()> {
    if !grad.has_shape(&self.output_shape) {
      return Err(Error::Shape(format!(
        "{} expects gradient of shape {:?}, got {:?}", self.id, self.output_shape, grad.dims())))
    }
    Ok(())
  }

  pub fn last_input(&self) -> Result<&Tensor> {
    self.input.as_ref()
      .ok_or_else(|| Error::State(format!("{} was not activated before back-propagation", self.id)) )
  }

  pub fn last_output(&self) -> Result<&Tensor> {
    self.output.as_ref()
      .ok_or_else(|| Error::State(format!("{} was not activated before back-propagation", self.id)) )
  }

  pub fn info(&self, kind: &str, weights: Option<&Param>, bias: Option<&Param>) -> LayerInfo {
    LayerInfo {
      id: self.id.clone(),
      kind: kind.to_string(),
      weights: weights.map(|w| w.read().stats() ),
      bias: bias.map(|b| b.read().stats() ),
      output: self.output.as_ref().map(|o| o.stats() ),
      propagation: self.propagation.as_ref().map(|p| p.stats() ),
    }
  }
}


/// Shapes and identity every layer persists.

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct BaseInfo {
  pub id: String,
  pub input_shape: Vec<usize>,
  pub output_shape: Vec<usize>,
}

impl From<&Base> for BaseInfo {
  fn from(base: &Base) -> Self {
    Self {
      id: base.id.clone(),
      input_shape: base.input_shape.clone(),
      output_shape: base.output_shape.clone(),
    }
  }
}


pub(crate) fn check_dims(what: &str, dims: &[usize]) -> Result<()> {
  if dims.is_empty() || dims.iter().any(|&d| d == 0 ) {
    return Err(Error::Config(format!("{what} must have positive dimensions, got {dims:?}")))
  }
  Ok(())
}

pub(crate) fn or_panic<T>(result: Result<T>) -> T {
  result.unwrap_or_else(|e| panic!("{e}") )
}
