use serde::{ Serialize, Deserialize };

use crate::{
  error::Result,
  tensor::Tensor,
  marshal::{ Archive, Registry },
  debug::LayerInfo,
};

use super::{ Layer, Base, BaseInfo, check_dims, or_panic };


/// Rectified linear unit with configurable slope for negative inputs.
///
/// A slope of zero gives the plain ReLU, [Relu::leaky] uses `0.01`.

#[derive(Debug, Clone)]
pub struct Relu {
  base: Base,
  slope: f64,
}

impl Relu {
  pub const KIND: &'static str = "relu";

  pub fn try_with_slope(shape: &[usize], slope: f64) -> Result<Self> {
    check_dims("ReLU shape", shape)?;
    Ok(Self { base: Base::new("ReLU", shape, shape), slope })
  }

  pub fn with_slope(shape: &[usize], slope: f64) -> Self {
    or_panic(Self::try_with_slope(shape, slope))
  }

  pub fn new(shape: &[usize]) -> Self {
    Self::with_slope(shape, 0.0)
  }

  pub fn leaky(shape: &[usize]) -> Self {
    Self::with_slope(shape, 0.01)
  }

  pub fn slope(&self) -> f64 {
    self.slope
  }

  pub fn unmarshal(archive: &Archive, _registry: &Registry) -> Result<Box<dyn Layer>> {
    let info: ReluInfo = archive.info()?;
    let mut layer = Self::try_with_slope(&info.base.input_shape, info.slope)?;
    layer.base.id = info.base.id;
    Ok(Box::new(layer))
  }
}

impl Layer for Relu {
  fn id(&self) -> &str { &self.base.id }
  fn kind(&self) -> &'static str { Self::KIND }
  fn input_shape(&self) -> &[usize] { &self.base.input_shape }
  fn output_shape(&self) -> &[usize] { &self.base.output_shape }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.base.check_input(input)?;
    let mut output = input.clone();
    output.values_mut().iter_mut()
      .filter(|x| **x <= 0.0 )
      .for_each(|x| *x *= self.slope );
    self.base.input = Some(input.clone());
    self.base.output = Some(output.clone());
    Ok(output)
  }

  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.base.check_grad(grad)?;
    let input = self.base.last_input()?;
    let mut propagation = grad.clone();
    propagation.values_mut().iter_mut()
      .zip(input.values())
      .filter(|(_, x)| **x <= 0.0 )
      .for_each(|(g, _)| *g *= self.slope );
    self.base.propagation = Some(propagation.clone());
    Ok(propagation)
  }

  fn enslave(&self) -> Box<dyn Layer> {
    Box::new(Self { base: self.base.enslave(), slope: self.slope })
  }

  fn marshal(&self) -> Result<Archive> {
    let mut archive = Archive::new();
    archive.put_info(&ReluInfo { base: BaseInfo::from(&self.base), slope: self.slope })?;
    Ok(archive)
  }

  fn debug_info(&self) -> Vec<LayerInfo> {
    vec![self.base.info(Self::KIND, None, None)]
  }
}


#[derive(Debug, Serialize, Deserialize)]
struct ReluInfo {
  base: BaseInfo,
  slope: f64,
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::layer::testing::*;

  #[test]
  fn rectify() {
    let input = Tensor::vec(&[-2.0, -0.5, 0.0, 0.5, 3.0]).unwrap();
    let mut relu = Relu::new(&[5]);
    assert_eq!(relu.activate(&input).unwrap().values(), &[0.0, 0.0, 0.0, 0.5, 3.0]);
    let mut leaky = Relu::leaky(&[5]);
    assert_close(leaky.activate(&input).unwrap().values(), &[-0.02, -0.005, 0.0, 0.5, 3.0], 1e-12);
  }

  #[test]
  fn gradient() {
    let input = Tensor::vec(&[-2.0, 0.5, 3.0]).unwrap();
    let grad = Tensor::vec(&[1.0, 2.0, 3.0]).unwrap();
    let mut relu = Relu::with_slope(&[3], 0.1);
    assert!(relu.back_propagate(&grad).is_err());
    relu.activate(&input).unwrap();
    assert_close(relu.back_propagate(&grad).unwrap().values(), &[0.1, 2.0, 3.0], 1e-12);
    check_gradient(&mut relu, &input, 1e-6);
  }
}
