/// Everything that can go wrong while building, running or training a network.

#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Tensor allocation failed or two tensors that must align don't.
  #[error("shape error: {0}")]
  Shape(String),

  /// Coordinates don't address an element of the tensor.
  #[error("index error: {0}")]
  Index(String),

  /// An operation was invoked before its prerequisite.
  #[error("state error: {0}")]
  State(String),

  /// Invalid construction parameters.
  #[error("config error: {0}")]
  Config(String),

  /// Unknown node ID or unknown serialization format.
  #[error("not found: {0}")]
  NotFound(String),

  /// NaN or infinity showed up. The training run has diverged.
  #[error("numeric error: {0}")]
  Numeric(String),

  /// A layer was asked for something it does not support.
  #[error("type error: {0}")]
  Type(String),

  #[error("dataset has no more items")]
  EndOfData,

  /// A graph pass was aborted because another node failed.
  #[error("pass interrupted at node {0}")]
  Interrupted(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Encoding(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
