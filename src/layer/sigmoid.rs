use crate::{
  error::Result,
  tensor::Tensor,
  marshal::{ Archive, Registry },
  debug::LayerInfo,
};

use super::{ Layer, Base, BaseInfo, check_dims, or_panic };


/// Logistic activation `1 / (1 + e^-x)`.

#[derive(Debug, Clone)]
pub struct Sigmoid {
  base: Base,
}

impl Sigmoid {
  pub const KIND: &'static str = "sigmoid";

  pub fn try_new(shape: &[usize]) -> Result<Self> {
    check_dims("Sigmoid shape", shape)?;
    Ok(Self { base: Base::new("Sigmoid", shape, shape) })
  }

  pub fn new(shape: &[usize]) -> Self {
    or_panic(Self::try_new(shape))
  }

  pub fn unmarshal(archive: &Archive, _registry: &Registry) -> Result<Box<dyn Layer>> {
    let info: BaseInfo = archive.info()?;
    let mut layer = Self::try_new(&info.input_shape)?;
    layer.base.id = info.id;
    Ok(Box::new(layer))
  }
}

fn logistic(x: f64) -> f64 {
  if x >= 0.0 {
    1.0 / (1.0 + (-x).exp())
  } else {
    let e = x.exp();
    e / (1.0 + e)
  }
}

impl Layer for Sigmoid {
  fn id(&self) -> &str { &self.base.id }
  fn kind(&self) -> &'static str { Self::KIND }
  fn input_shape(&self) -> &[usize] { &self.base.input_shape }
  fn output_shape(&self) -> &[usize] { &self.base.output_shape }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.base.check_input(input)?;
    let mut output = input.clone();
    output.values_mut().iter_mut().for_each(|x| *x = logistic(*x) );
    self.base.input = Some(input.clone());
    self.base.output = Some(output.clone());
    Ok(output)
  }

  // e^-x / (1 + e^-x)^2 equals s · (1 - s)
  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.base.check_grad(grad)?;
    let output = self.base.last_output()?;
    let mut propagation = grad.clone();
    propagation.values_mut().iter_mut()
      .zip(output.values())
      .for_each(|(g, s)| *g *= s * (1.0 - s) );
    self.base.propagation = Some(propagation.clone());
    Ok(propagation)
  }

  fn enslave(&self) -> Box<dyn Layer> {
    Box::new(Self { base: self.base.enslave() })
  }

  fn marshal(&self) -> Result<Archive> {
    let mut archive = Archive::new();
    archive.put_info(&BaseInfo::from(&self.base))?;
    Ok(archive)
  }

  fn debug_info(&self) -> Vec<LayerInfo> {
    vec![self.base.info(Self::KIND, None, None)]
  }
}
