use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  marshal::{ Archive, Registry },
  debug::LayerInfo,
};

use super::{ Layer, Base, BaseInfo, check_dims, or_panic };


/// Relabels values under a different shape of equal size.

#[derive(Debug, Clone)]
pub struct Reshaper {
  base: Base,
  activated: bool,
}

impl Reshaper {
  pub const KIND: &'static str = "reshaper";

  pub fn try_new(input: &[usize], output: &[usize]) -> Result<Self> {
    check_dims("Reshaper input", input)?;
    check_dims("Reshaper output", output)?;
    if input.iter().product::<usize>() != output.iter().product::<usize>() {
      return Err(Error::Config(format!("Cannot reshape {input:?} into {output:?}")))
    }
    Ok(Self { base: Base::new("Reshaper", input, output), activated: false })
  }

  pub fn new(input: &[usize], output: &[usize]) -> Self {
    or_panic(Self::try_new(input, output))
  }

  pub fn unmarshal(archive: &Archive, _registry: &Registry) -> Result<Box<dyn Layer>> {
    let info: BaseInfo = archive.info()?;
    let mut layer = Self::try_new(&info.input_shape, &info.output_shape)?;
    layer.base.id = info.id;
    Ok(Box::new(layer))
  }
}

impl Layer for Reshaper {
  fn id(&self) -> &str { &self.base.id }
  fn kind(&self) -> &'static str { Self::KIND }
  fn input_shape(&self) -> &[usize] { &self.base.input_shape }
  fn output_shape(&self) -> &[usize] { &self.base.output_shape }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.base.check_input(input)?;
    self.activated = true;
    input.clone().reshape(&self.base.output_shape)
  }

  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.base.check_grad(grad)?;
    if !self.activated {
      return Err(Error::State(format!("{} was not activated before back-propagation", self.base.id)))
    }
    grad.clone().reshape(&self.base.input_shape)
  }

  fn enslave(&self) -> Box<dyn Layer> {
    Box::new(Self { base: self.base.enslave(), activated: false })
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

  #[test]
  fn relabel() {
    let mut layer = Reshaper::new(&[2,2,2], &[8]);
    let input = Tensor::new(&[2,2,2], (0..8).map(|i| i as f64 ).collect()).unwrap();
    assert!(layer.back_propagate(&Tensor::zeros(&[8]).unwrap()).is_err());
    let output = layer.activate(&input).unwrap();
    assert_eq!(output.dims(), &[8]);
    assert_eq!(output.values(), input.values());
    let back = layer.back_propagate(&output).unwrap();
    assert_eq!(back, input);
  }

  #[test]
  fn size_mismatch() {
    assert!(matches!(Reshaper::try_new(&[2,3], &[5]), Err(Error::Config(_))));
  }
}
