#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  marshal::{ Archive, Registry },
  debug::LayerInfo,
  internal,
};

use super::{ Layer, Param, ParamGrad, Base, BaseInfo, or_panic };


/// Fully connected layer.
///
/// `output[i] = bias[i] + Σ_j weight[i][j] · input[j]`, with weights stored
/// as a `[inputs, outputs]` tensor so that one output's row is contiguous.

#[derive(Debug)]
pub struct Dense {
  base: Base,
  weights: Param,
  bias: Param,
  weights_grad: Tensor,
  bias_grad: Tensor,
}

impl Dense {
  pub const KIND: &'static str = "dense";

  /// He-initialized dense layer.

  pub fn try_new(inputs: usize, outputs: usize) -> Result<Self> {
    if inputs == 0 || outputs == 0 {
      return Err(Error::Config(format!("Dense layer needs positive sizes, got {inputs} -> {outputs}")))
    }
    let stdev = (2.0 / inputs as f64).sqrt();
    let weights = Tensor::new(&[inputs, outputs], internal::normal_vec(inputs * outputs, stdev))?;
    let bias = Tensor::zeros(&[outputs])?;
    Self::build(Base::new("Dense", &[inputs], &[outputs]), weights, bias)
  }

  pub fn new(inputs: usize, outputs: usize) -> Self {
    or_panic(Self::try_new(inputs, outputs))
  }

  /// Dense layer with given parameters.
  ///
  /// `weights` must be `[inputs, outputs]` and `bias` `[outputs]`.

  pub fn with_params(weights: Tensor, bias: Tensor) -> Result<Self> {
    if weights.rank() != 2 || bias.rank() != 1 || weights.dims()[1] != bias.len() {
      return Err(Error::Config(format!(
        "Dense weights {} don't fit bias {}", weights.shape(), bias.shape())))
    }
    let (inputs, outputs) = (weights.dims()[0], weights.dims()[1]);
    Self::build(Base::new("Dense", &[inputs], &[outputs]), weights, bias)
  }

  fn build(base: Base, weights: Tensor, bias: Tensor) -> Result<Self> {
    Ok(Self {
      base,
      weights_grad: Tensor::zeros(weights.dims())?,
      bias_grad: Tensor::zeros(bias.dims())?,
      weights: Param::new(weights),
      bias: Param::new(bias),
    })
  }

  pub fn weights(&self) -> &Param {
    &self.weights
  }

  pub fn bias(&self) -> &Param {
    &self.bias
  }

  pub fn unmarshal(archive: &Archive, _registry: &Registry) -> Result<Box<dyn Layer>> {
    let info: BaseInfo = archive.info()?;
    let weights = archive.tensor("weights")?;
    let bias = archive.tensor("bias")?;
    if info.input_shape.len() != 1 || info.output_shape.len() != 1 {
      return Err(Error::Shape(format!(
        "Stored shapes {:?} -> {:?} of {} are not vectors", info.input_shape, info.output_shape, info.id)))
    }
    if !weights.has_shape(&[info.input_shape[0], info.output_shape[0]]) || !bias.has_shape(&info.output_shape) {
      return Err(Error::Shape(format!("Stored parameters of {} don't match its shapes", info.id)))
    }
    let base = Base::with_id(info.id, &info.input_shape, &info.output_shape);
    Ok(Box::new(Self::build(base, weights, bias)?))
  }

  fn inputs(&self) -> usize {
    self.base.input_shape[0]
  }
}

impl Layer for Dense {
  fn id(&self) -> &str { &self.base.id }
  fn kind(&self) -> &'static str { Self::KIND }
  fn input_shape(&self) -> &[usize] { &self.base.input_shape }
  fn output_shape(&self) -> &[usize] { &self.base.output_shape }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.base.check_input(input)?;
    let ni = self.inputs();
    let values = {
      let weights = self.weights.read();
      let bias = self.bias.read();
      let (w, b, x) = (weights.values(), bias.values(), input.values());
      let row = |i: usize| -> f64 {
        b[i] + w[i * ni..(i + 1) * ni].iter().zip(x).map(|(a, b)| a * b ).sum::<f64>()
      };
      #[cfg(feature = "rayon")]
      let values: Vec<f64> = (0..b.len()).into_par_iter().map(row).collect();
      #[cfg(not(feature = "rayon"))]
      let values: Vec<f64> = (0..b.len()).map(row).collect();
      values
    };
    let output = Tensor::new(&self.base.output_shape, values)?;
    self.base.input = Some(input.clone());
    self.base.output = Some(output.clone());
    Ok(output)
  }

  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.base.check_grad(grad)?;
    let ni = self.inputs();
    let input = self.base.last_input()?;
    let mut propagation = Tensor::zeros(&self.base.input_shape)?;
    {
      let weights = self.weights.read();
      let w = weights.values();
      let wg = self.weights_grad.values_mut();
      let p = propagation.values_mut();
      for (i, &g) in grad.values().iter().enumerate() {
        let row = i * ni..(i + 1) * ni;
        for ((wg, w), (p, x)) in wg[row.clone()].iter_mut().zip(&w[row])
          .zip(p.iter_mut().zip(input.values()))
        {
          *wg += g * x;
          *p += g * w;
        }
      }
    }
    self.bias_grad.add(&[grad])?;
    self.base.propagation = Some(propagation.clone());
    Ok(propagation)
  }

  fn enslave(&self) -> Box<dyn Layer> {
    Box::new(Self {
      base: self.base.enslave(),
      weights: self.weights.clone(),
      bias: self.bias.clone(),
      weights_grad: self.weights_grad.zeroed(),
      bias_grad: self.bias_grad.zeroed(),
    })
  }

  fn param_grads(&mut self) -> Vec<ParamGrad<'_>> {
    vec![
      ParamGrad { param: self.bias.clone(), grad: &mut self.bias_grad },
      ParamGrad { param: self.weights.clone(), grad: &mut self.weights_grad },
    ]
  }

  fn marshal(&self) -> Result<Archive> {
    let mut archive = Archive::new();
    archive.put_info(&BaseInfo::from(&self.base))?;
    archive.put_tensor("bias", &self.bias.read())?;
    archive.put_tensor("weights", &self.weights.read())?;
    Ok(archive)
  }

  fn debug_info(&self) -> Vec<LayerInfo> {
    vec![self.base.info(Self::KIND, Some(&self.weights), Some(&self.bias))]
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::layer::testing::*;

  fn fixture() -> Dense {
    let weights = Tensor::new(&[3,2], vec![1.01, 3.1, 0.223, 0.61, 2.902, 5.009]).unwrap();
    let bias = Tensor::vec(&[0.023, 0.82]).unwrap();
    Dense::with_params(weights, bias).unwrap()
  }

  #[test]
  fn activate() {
    let mut layer = fixture();
    let input = Tensor::vec(&[0.5, 0.123, 0.7784]).unwrap();
    let output = layer.activate(&input).unwrap();
    let expected = [
      0.023 + 0.5 * 1.01 + 0.123 * 3.1 + 0.7784 * 0.223,
      0.82 + 0.5 * 0.61 + 0.123 * 2.902 + 0.7784 * 5.009,
    ];
    assert_close(output.values(), &expected, 1e-3);
  }

  #[test]
  fn wrong_input() {
    let mut layer = fixture();
    assert!(matches!(layer.activate(&Tensor::zeros(&[4]).unwrap()), Err(Error::Shape(_))));
  }

  #[test]
  fn backward_needs_forward() {
    let mut layer = fixture();
    let grad = Tensor::vec(&[1.0, 1.0]).unwrap();
    assert!(matches!(layer.back_propagate(&grad), Err(Error::State(_))));
  }

  #[test]
  fn gradients() {
    let mut layer = fixture();
    let input = Tensor::vec(&[0.5, 0.123, 0.7784]).unwrap();
    check_gradient(&mut layer, &input, 1e-6);

    // Parameter gradients of the last backward pass
    let mut layer = fixture();
    layer.activate(&input).unwrap();
    layer.back_propagate(&Tensor::vec(&[2.0, -1.0]).unwrap()).unwrap();
    let grads = layer.param_grads();
    assert_eq!(grads[0].grad.values(), &[2.0, -1.0]);
    assert_close(grads[1].grad.values(), &[1.0, 0.246, 1.5568, -0.5, -0.123, -0.7784], 1e-12);
  }

  #[test]
  fn slaves_share_weights() {
    let mut layer = fixture();
    let mut slave = layer.enslave();
    assert_eq!(slave.id(), layer.id());
    let input = Tensor::vec(&[0.5, 0.123, 0.7784]).unwrap();
    slave.activate(&input).unwrap();
    slave.back_propagate(&Tensor::vec(&[1.0, 1.0]).unwrap()).unwrap();

    let slave_grads = slave.param_grads();
    let grads = layer.param_grads();
    assert!(grads[1].param.shares_storage(&slave_grads[1].param));
    // Gradients stay private
    assert!(grads[1].grad.values().iter().all(|&g| g == 0.0 ));
    assert!(slave_grads[1].grad.values().iter().any(|&g| g != 0.0 ));
  }

  #[test]
  fn init() {
    crate::seed(3);
    let layer = Dense::new(200, 50);
    let stats = layer.weights().read().stats();
    assert!(stats.mean.abs() < 0.02);
    assert!((stats.stddev - 0.1).abs() < 0.01);
    assert!(layer.bias().read().values().iter().all(|&b| b == 0.0 ));
    assert!(Dense::try_new(0, 3).is_err());
  }

  #[test]
  fn stored_shapes_must_be_vectors() {
    let layer = fixture();
    let registry = Registry::new();
    let mut restored = Dense::unmarshal(&layer.marshal().unwrap(), &registry).unwrap();
    let input = Tensor::vec(&[0.5, 0.123, 0.7784]).unwrap();
    assert_eq!(restored.activate(&input).unwrap(), fixture().activate(&input).unwrap());

    let mut archive = layer.marshal().unwrap();
    let mut info: BaseInfo = archive.info().unwrap();
    info.input_shape = vec![];
    archive.put_info(&info).unwrap();
    assert!(matches!(Dense::unmarshal(&archive, &registry), Err(Error::Shape(_))));

    info.input_shape = vec![3,2];
    archive.put_info(&info).unwrap();
    assert!(matches!(Dense::unmarshal(&archive, &registry), Err(Error::Shape(_))));
  }
}
