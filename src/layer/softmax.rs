use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  marshal::{ Archive, Registry },
  debug::LayerInfo,
};

use super::{ Layer, Base, BaseInfo, check_dims, or_panic };


/// Normalized exponential over all input values.

#[derive(Debug, Clone)]
pub struct Softmax {
  base: Base,
}

impl Softmax {
  pub const KIND: &'static str = "softmax";

  pub fn try_new(shape: &[usize]) -> Result<Self> {
    check_dims("Softmax shape", shape)?;
    Ok(Self { base: Base::new("Softmax", shape, shape) })
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

impl Layer for Softmax {
  fn id(&self) -> &str { &self.base.id }
  fn kind(&self) -> &'static str { Self::KIND }
  fn input_shape(&self) -> &[usize] { &self.base.input_shape }
  fn output_shape(&self) -> &[usize] { &self.base.output_shape }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.base.check_input(input)?;
    let (_, max) = input.max();
    let mut output = input.clone();
    output.values_mut().iter_mut().for_each(|x| *x = (*x - max).exp() );
    let sum: f64 = output.values().iter().sum();
    output.scale(1.0 / sum);
    if !output.is_finite() {
      return Err(Error::Numeric(format!("{} produced non-finite values", self.base.id)))
    }
    self.base.input = Some(input.clone());
    self.base.output = Some(output.clone());
    Ok(output)
  }

  // Σ_j (δ_ij · out_i - out_i · out_j) · err_j = out_i · (err_i - Σ_j out_j · err_j)
  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.base.check_grad(grad)?;
    let output = self.base.last_output()?;
    let dot: f64 = output.values().iter().zip(grad.values()).map(|(o, e)| o * e ).sum();
    let mut propagation = grad.clone();
    propagation.values_mut().iter_mut()
      .zip(output.values())
      .for_each(|(e, o)| *e = o * (*e - dot) );
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


#[cfg(test)]
mod tests {
  use super::*;
  use crate::layer::testing::*;

  #[test]
  fn normalizes() {
    let mut layer = Softmax::new(&[4]);
    let input = Tensor::vec(&[1.0, -2.0, 0.5, 3.0]).unwrap();
    let output = layer.activate(&input).unwrap();
    let sum: f64 = output.values().iter().sum();
    assert!((sum - 1.0).abs() < 1e-12);
    assert!(output.values().iter().all(|&o| o > 0.0 ));

    // Shifting all inputs changes nothing
    let mut shifted = input.clone();
    shifted.values_mut().iter_mut().for_each(|x| *x += 500.0 );
    let output2 = layer.activate(&shifted).unwrap();
    assert_close(output2.values(), output.values(), 1e-12);
  }

  #[test]
  fn large_inputs() {
    let mut layer = Softmax::new(&[3]);
    let output = layer.activate(&Tensor::vec(&[1000.0, 1000.0, -1000.0]).unwrap()).unwrap();
    assert_close(output.values(), &[0.5, 0.5, 0.0], 1e-12);
  }

  #[test]
  fn not_a_number() {
    let mut layer = Softmax::new(&[2]);
    let result = layer.activate(&Tensor::vec(&[f64::NAN, 1.0]).unwrap());
    assert!(matches!(result, Err(Error::Numeric(_))));
  }

  #[test]
  fn gradient() {
    let mut layer = Softmax::new(&[5]);
    let input = Tensor::vec(&[0.3, -1.2, 2.0, 0.0, 0.7]).unwrap();
    check_gradient(&mut layer, &input, 1e-7);
  }
}
