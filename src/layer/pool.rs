use serde::{ Serialize, Deserialize };

use crate::{
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  marshal::{ Archive, Registry },
  debug::LayerInfo,
};

use super::{ Layer, Base, BaseInfo, check_dims, or_panic };


/// Max pooling over non-overlapping windows.
///
/// Every input dimension must be a multiple of the corresponding kernel
/// dimension. The position of each window's maximum is remembered so the
/// backward pass can route gradients to it.

#[derive(Debug, Clone)]
pub struct Pool {
  base: Base,
  kernel: Vec<usize>,
  // Flat input offset of every window origin, in output order
  origins: Vec<usize>,
  // Flat offsets of all window cells relative to the origin
  window: Vec<usize>,
  winners: Vec<usize>,
}

impl Pool {
  pub const KIND: &'static str = "pool";

  pub fn try_new(input: &[usize], kernel: &[usize]) -> Result<Self> {
    check_dims("Pooling input", input)?;
    check_dims("Pooling kernel", kernel)?;
    if input.len() != kernel.len() {
      return Err(Error::Config(format!("Pooling kernel {kernel:?} doesn't match input {input:?}")))
    }
    if input.iter().zip(kernel).any(|(i, k)| i % k != 0 ) {
      return Err(Error::Config(format!("Pooling kernel {kernel:?} doesn't divide input {input:?}")))
    }
    let output: Vec<usize> = input.iter().zip(kernel).map(|(i, k)| i / k ).collect();
    Self::build(Base::new("Pool", input, &output), kernel)
  }

  pub fn new(input: &[usize], kernel: &[usize]) -> Self {
    or_panic(Self::try_new(input, kernel))
  }

  fn build(base: Base, kernel: &[usize]) -> Result<Self> {
    let input = Shape::new(&base.input_shape)?;
    let output = Shape::new(&base.output_shape)?;
    let window_shape = Shape::new(kernel)?;
    let flat = |coords: &[usize], scale: &[usize]| -> usize {
      coords.iter()
        .zip(scale)
        .zip(input.strides())
        .map(|((c, s), stride)| c * s * stride )
        .sum()
    };
    let ones = vec![1; kernel.len()];
    let origins = (0..output.size())
      .map(|o| Ok(flat(&output.coords(o)?, kernel)) )
      .collect::<Result<_>>()?;
    let window = (0..window_shape.size())
      .map(|w| Ok(flat(&window_shape.coords(w)?, &ones)) )
      .collect::<Result<_>>()?;
    Ok(Self { base, kernel: kernel.to_vec(), origins, window, winners: vec![] })
  }

  pub fn unmarshal(archive: &Archive, _registry: &Registry) -> Result<Box<dyn Layer>> {
    let info: PoolInfo = archive.info()?;
    let mut layer = Self::try_new(&info.base.input_shape, &info.kernel)?;
    layer.base.id = info.base.id;
    Ok(Box::new(layer))
  }
}

impl Layer for Pool {
  fn id(&self) -> &str { &self.base.id }
  fn kind(&self) -> &'static str { Self::KIND }
  fn input_shape(&self) -> &[usize] { &self.base.input_shape }
  fn output_shape(&self) -> &[usize] { &self.base.output_shape }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.base.check_input(input)?;
    let x = input.values();
    self.winners.clear();
    let mut values = Vec::with_capacity(self.origins.len());
    for &origin in &self.origins {
      let mut best = origin + self.window[0];
      for &offset in &self.window[1..] {
        if x[origin + offset] > x[best] { best = origin + offset }
      }
      self.winners.push(best);
      values.push(x[best]);
    }
    let output = Tensor::new(&self.base.output_shape, values)?;
    self.base.input = Some(input.clone());
    self.base.output = Some(output.clone());
    Ok(output)
  }

  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.base.check_grad(grad)?;
    self.base.last_input()?;
    let mut propagation = Tensor::zeros(&self.base.input_shape)?;
    let p = propagation.values_mut();
    for (&winner, &g) in self.winners.iter().zip(grad.values()) {
      p[winner] += g;
    }
    self.base.propagation = Some(propagation.clone());
    Ok(propagation)
  }

  fn enslave(&self) -> Box<dyn Layer> {
    Box::new(Self {
      base: self.base.enslave(),
      winners: vec![],
      ..self.clone()
    })
  }

  fn marshal(&self) -> Result<Archive> {
    let mut archive = Archive::new();
    archive.put_info(&PoolInfo { base: BaseInfo::from(&self.base), kernel: self.kernel.clone() })?;
    Ok(archive)
  }

  fn debug_info(&self) -> Vec<LayerInfo> {
    vec![self.base.info(Self::KIND, None, None)]
  }
}


#[derive(Debug, Serialize, Deserialize)]
struct PoolInfo {
  base: BaseInfo,
  kernel: Vec<usize>,
}
