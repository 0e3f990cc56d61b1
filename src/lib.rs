//! Neural networks as graphs of layers, trained by back-propagation.
//! CPU only. Few dependencies.
//!
//! # Features
//!
//! - **Layers**: Dense, convolutional, max pooling, (leaky) ReLU, sigmoid,
//! softmax and reshaping, all sharing one [Layer] contract.
//!
//! - **Graph networks**: Layers are wired into a directed acyclic [Network],
//! which is itself a layer. Every node runs as its own task during a pass,
//! handing tensors to its neighbours through single-slot channels.
//!
//! - **Parallel training**: The [Trainer] splits every batch across worker
//! copies of the network that share its parameters, then merges their gradients
//! using Momentum, AdaDelta or Adam updates.
//!
//! - **Persistence**: Layers and whole networks marshal into a self-describing
//! [marshal::Archive] and load back through an explicit [marshal::Registry].
//!
//! # Examples
//!
//! Training a small classifier:
//! ```no_run
//! use dagnet::{
//!   Network, Trainer, LearningConfig, UpdateMethod,
//!   layer::{ Dense, Sigmoid, Softmax },
//!   cost::CrossEntropy,
//!   dataset::{ PairSet, TensorSet },
//!   Tensor,
//! };
//!
//! fn main() -> dagnet::Result<()> {
//!   dagnet::seed(42);
//!
//!   let net = Network::sequential(vec![
//!     Box::new(Dense::new(2, 8)),
//!     Box::new(Sigmoid::new(&[8])),
//!     Box::new(Dense::new(8, 2)),
//!     Box::new(Softmax::new(&[2])),
//!   ])?;
//!
//!   let inputs = vec![Tensor::vec(&[0.0, 1.0])?, Tensor::vec(&[1.0, 0.0])?];
//!   let answers = vec![Tensor::vec(&[1.0, 0.0])?, Tensor::vec(&[0.0, 1.0])?];
//!   let train = TensorSet::new(inputs.clone(), answers.clone())?;
//!   let test = TensorSet::new(inputs, answers)?;
//!
//!   let config = LearningConfig { method: UpdateMethod::Adam, batch_size: 2, ..Default::default() };
//!   let mut trainer = Trainer::new(config, Box::new(net), Box::new(CrossEntropy::new(&[2])), PairSet::new(train, test));
//!   trainer.set_workers(2)?;
//!   trainer.train()?;
//!
//!   let (accuracy, loss) = trainer.test()?;
//!   println!("accuracy {accuracy} loss {loss}");
//!   Ok(())
//! }
//! ```
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)*: Accelerated convolution using the [matrixmultiply] crate.
//! - `rayon`: Multi-threaded dense layer forward passes.

mod internal;

pub mod error;
pub mod shape;
pub mod tensor;
pub mod layer;
pub mod network;
pub mod cost;
pub mod dataset;
pub mod debug;
pub mod marshal;
pub mod optimize;
pub mod train;

pub use error::{ Error, Result };
pub use shape::Shape;
pub use tensor::{ Tensor, Stats };
pub use layer::{ Layer, Param, ParamGrad };
pub use network::{ Network, Execution };
pub use train::{ Trainer, LearningConfig, UpdateMethod, Hyperparameters };
pub use internal::seed;
