use crate::{
  error::{ Error, Result },
  tensor::Tensor,
};


/// A loss that can propagate its gradient back into a network.
///
/// The gradient of the last [cost](CostFunction::cost) call is retained
/// until [back_propagate](CostFunction::back_propagate) consumes it.

pub trait CostFunction: std::fmt::Debug + Send {
  fn cost(&mut self, output: &Tensor, target: &Tensor) -> Result<f64>;
  fn back_propagate(&mut self) -> Result<Tensor>;

  /// Fresh instance with the same configuration for another worker.
  fn enslave(&self) -> Box<dyn CostFunction>;
}


fn check(size: &[usize], output: &Tensor, target: &Tensor) -> Result<()> {
  if !output.has_shape(size) {
    return Err(Error::Shape(format!("Cost function expects {:?}, got {:?}", size, output.dims())))
  }
  if output.shape() != target.shape() {
    return Err(Error::Shape(format!("Output {} doesn't match target {}", output.shape(), target.shape())))
  }
  Ok(())
}

fn check_finite(cost: f64) -> Result<f64> {
  if !cost.is_finite() {
    return Err(Error::Numeric(format!("cost is {cost}")))
  }
  Ok(cost)
}

fn take_grad(grad: &mut Option<Tensor>) -> Result<Tensor> {
  grad.take()
    .ok_or_else(|| Error::State("Cost function has to be computed before back-propagation".into()) )
}


/// `-Σ target · ln(output)`, with outputs floored at `1e-10`.

#[derive(Debug, Clone)]
pub struct CrossEntropy {
  size: Vec<usize>,
  grad: Option<Tensor>,
}

impl CrossEntropy {
  pub const FLOOR: f64 = 1e-10;

  pub fn new(size: &[usize]) -> Self {
    Self { size: size.to_vec(), grad: None }
  }
}

impl CostFunction for CrossEntropy {
  fn cost(&mut self, output: &Tensor, target: &Tensor) -> Result<f64> {
    self.grad = None;
    check(&self.size, output, target)?;
    // The floor would hide NaN outputs
    if !output.is_finite() {
      return Err(Error::Numeric("network output is not finite".into()))
    }
    let mut grad = output.zeroed();
    let mut cost = 0.0;
    for ((g, o), t) in grad.values_mut().iter_mut().zip(output.values()).zip(target.values()) {
      let o = o.max(Self::FLOOR);
      cost -= t * o.ln();
      *g = -t / o;
    }
    let cost = check_finite(cost)?;
    self.grad = Some(grad);
    Ok(cost)
  }

  fn back_propagate(&mut self) -> Result<Tensor> {
    take_grad(&mut self.grad)
  }

  fn enslave(&self) -> Box<dyn CostFunction> {
    Box::new(Self::new(&self.size))
  }
}


/// `Σ (target - output)² / 4n`

#[derive(Debug, Clone)]
pub struct SquareMean {
  size: Vec<usize>,
  grad: Option<Tensor>,
}

impl SquareMean {
  pub fn new(size: &[usize]) -> Self {
    Self { size: size.to_vec(), grad: None }
  }
}

impl CostFunction for SquareMean {
  fn cost(&mut self, output: &Tensor, target: &Tensor) -> Result<f64> {
    self.grad = None;
    check(&self.size, output, target)?;
    let n = output.len() as f64;
    let mut grad = output.zeroed();
    let mut cost = 0.0;
    for ((g, o), t) in grad.values_mut().iter_mut().zip(output.values()).zip(target.values()) {
      let d = t - o;
      cost += d * d;
      *g = -d / (2.0 * n);
    }
    let cost = check_finite(cost / (4.0 * n))?;
    self.grad = Some(grad);
    Ok(cost)
  }

  fn back_propagate(&mut self) -> Result<Tensor> {
    take_grad(&mut self.grad)
  }

  fn enslave(&self) -> Box<dyn CostFunction> {
    Box::new(Self::new(&self.size))
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::layer::testing::assert_close;

  // Finite difference gradient of a cost function
  fn numeric_grad(cost: &mut dyn CostFunction, output: &Tensor, target: &Tensor) -> Vec<f64> {
    let eps = 1e-6;
    (0..output.len()).map(|i| {
      let mut plus = output.clone();
      plus.values_mut()[i] += eps;
      let mut minus = output.clone();
      minus.values_mut()[i] -= eps;
      (cost.cost(&plus, target).unwrap() - cost.cost(&minus, target).unwrap()) / (2.0 * eps)
    }).collect()
  }

  #[test]
  fn cross_entropy() {
    let mut cost = CrossEntropy::new(&[3]);
    let output = Tensor::vec(&[0.2, 0.7, 0.1]).unwrap();
    let target = Tensor::vec(&[0.0, 1.0, 0.0]).unwrap();
    let value = cost.cost(&output, &target).unwrap();
    assert!((value + 0.7f64.ln()).abs() < 1e-12);
    let grad = cost.back_propagate().unwrap();
    assert_close(grad.values(), &[0.0, -1.0 / 0.7, 0.0], 1e-12);

    let numeric = numeric_grad(&mut cost, &output, &target);
    assert_close(grad.values(), &numeric, 1e-5);
  }

  #[test]
  fn cross_entropy_floor() {
    let mut cost = CrossEntropy::new(&[2]);
    let value = cost.cost(&Tensor::vec(&[0.0, 1.0]).unwrap(), &Tensor::vec(&[1.0, 0.0]).unwrap()).unwrap();
    assert!((value - 1e-10f64.ln().abs()).abs() < 1e-9);
  }

  #[test]
  fn square_mean() {
    let mut cost = SquareMean::new(&[2,2]);
    let output = Tensor::new(&[2,2], vec![0.5, -1.0, 2.0, 0.0]).unwrap();
    let target = Tensor::new(&[2,2], vec![1.0, 1.0, 0.0, 0.0]).unwrap();
    let value = cost.cost(&output, &target).unwrap();
    assert!((value - (0.25 + 4.0 + 4.0) / 16.0).abs() < 1e-12);
    let grad = cost.back_propagate().unwrap();
    let numeric = numeric_grad(&mut cost, &output, &target);
    assert_close(grad.values(), &numeric, 1e-6);
  }

  #[test]
  fn backward_once() {
    let mut cost = SquareMean::new(&[1]);
    assert!(matches!(cost.back_propagate(), Err(Error::State(_))));
    cost.cost(&Tensor::vec(&[1.0]).unwrap(), &Tensor::vec(&[0.0]).unwrap()).unwrap();
    assert!(cost.back_propagate().is_ok());
    assert!(matches!(cost.back_propagate(), Err(Error::State(_))));
  }

  #[test]
  fn mismatch() {
    let mut cost = CrossEntropy::new(&[3]);
    let three = Tensor::vec(&[0.3, 0.3, 0.4]).unwrap();
    let four = Tensor::vec(&[0.25; 4]).unwrap();
    assert!(matches!(cost.cost(&four, &four), Err(Error::Shape(_))));
    assert!(matches!(cost.cost(&three, &four), Err(Error::Shape(_))));
    let column = Tensor::new(&[3,1], vec![0.3, 0.3, 0.4]).unwrap();
    assert!(matches!(cost.cost(&column, &column), Err(Error::Shape(_))));
  }

  #[test]
  fn diverged() {
    let mut cost = SquareMean::new(&[2]);
    let output = Tensor::vec(&[f64::NAN, 0.0]).unwrap();
    let target = Tensor::vec(&[1.0, 0.0]).unwrap();
    assert!(matches!(cost.cost(&output, &target), Err(Error::Numeric(_))));
    assert!(cost.back_propagate().is_err());
  }

  #[test]
  fn failed_cost_drops_gradient() {
    let target = Tensor::vec(&[1.0, 0.0]).unwrap();
    let mut cost = SquareMean::new(&[2]);
    cost.cost(&Tensor::vec(&[0.5, 0.5]).unwrap(), &target).unwrap();
    assert!(cost.cost(&Tensor::vec(&[f64::INFINITY, 0.0]).unwrap(), &target).is_err());
    assert!(matches!(cost.back_propagate(), Err(Error::State(_))));

    let mut cost = CrossEntropy::new(&[2]);
    cost.cost(&Tensor::vec(&[0.5, 0.5]).unwrap(), &target).unwrap();
    assert!(matches!(cost.cost(&Tensor::vec(&[0.5; 3]).unwrap(), &target), Err(Error::Shape(_))));
    assert!(matches!(cost.back_propagate(), Err(Error::State(_))));
  }
}
