use std::collections::HashMap;

use crate::{
  error::{ Error, Result },
  layer::ParamGrad,
};


/// An update rule to be used with [Optimizer].
///
/// `index` identifies the parameter tensor across calls, so strategies can
/// keep per-parameter state. Returns the change to add to the parameter.

pub trait Strategy: std::fmt::Debug + Send {
  fn update(&mut self, index: usize, grad: &[f64], rate: f64, step: usize) -> Vec<f64>;
}


/// Applies a [Strategy] to gradients collected from any number of workers.

#[derive(Debug)]
pub struct Optimizer {
  strategy: Box<dyn Strategy>,
  pub weight_decay: f64,
  step: usize,
}

impl Optimizer {
  pub fn new(strategy: Box<dyn Strategy>, weight_decay: f64) -> Self {
    Self { strategy, weight_decay, step: 1 }
  }

  /// Number of updates applied so far plus one.

  pub fn step(&self) -> usize {
    self.step
  }

  /// Update all parameters from the summed gradients of every worker.
  ///
  /// `workers[w][i]` is worker `w`'s gradient for parameter `i`. Worker
  /// gradients are reset to zero for the next batch. The summed gradient plus
  /// weight decay is averaged over `batch_size` examples before the
  /// strategy sees it.

  pub fn minimize(&mut self, workers: &mut [Vec<ParamGrad>], batch_size: usize, rate: f64) -> Result<()> {
    let Some(count) = workers.first().map(|w| w.len() ) else { return Ok(()) };
    if workers.iter().any(|w| w.len() != count ) {
      return Err(Error::State("Workers disagree on the number of parameters".into()))
    }
    for i in 0..count {
      let param = workers[0][i].param.clone();
      let mut grad = vec![0.0; workers[0][i].grad.len()];
      for worker in workers.iter_mut() {
        let pg = &mut worker[i];
        if !pg.param.shares_storage(&param) || pg.grad.len() != grad.len() {
          return Err(Error::State(format!("Worker parameter {i} is not shared with the master")))
        }
        grad.iter_mut().zip(pg.grad.values()).for_each(|(sum, g)| *sum += g );
        pg.grad.refill(0.0);
      }

      let mut values = param.write();
      for (g, p) in grad.iter_mut().zip(values.values()) {
        *g = (*g + self.weight_decay * p) / batch_size as f64;
      }
      let change = self.strategy.update(i, &grad, rate, self.step);
      values.values_mut().iter_mut()
        .zip(&change)
        .for_each(|(p, c)| *p += c );
      if !values.is_finite() {
        return Err(Error::Numeric(format!("parameter {i} diverged at update {}", self.step)))
      }
    }
    self.step += 1;
    Ok(())
  }
}


/// Gradient descent with momentum.

#[derive(Debug, Clone)]
pub struct Momentum {
  pub momentum: f64,
  v: HashMap<usize, Vec<f64>>,
}

impl Momentum {
  pub fn new(momentum: f64) -> Self {
    Self { momentum, v: HashMap::new() }
  }
}

impl Default for Momentum {
  fn default() -> Self {
    Self::new(0.9)
  }
}

impl Strategy for Momentum {
  fn update(&mut self, index: usize, grad: &[f64], rate: f64, _step: usize) -> Vec<f64> {
    let v = self.v.entry(index).or_insert_with(|| vec![0.0; grad.len()] );
    for (v, g) in v.iter_mut().zip(grad) {
      *v = *v * self.momentum - g * rate;
    }
    v.clone()
  }
}


/// AdaDelta, which adapts its own step size and ignores the learning rate.

#[derive(Debug, Clone)]
pub struct AdaDelta {
  pub rho: f64,
  pub epsilon: f64,
  grads: HashMap<usize, Vec<f64>>,
  deltas: HashMap<usize, Vec<f64>>,
}

impl AdaDelta {
  pub fn new(rho: f64, epsilon: f64) -> Self {
    Self { rho, epsilon, grads: HashMap::new(), deltas: HashMap::new() }
  }
}

impl Default for AdaDelta {
  fn default() -> Self {
    Self::new(0.95, 1e-8)
  }
}

impl Strategy for AdaDelta {
  fn update(&mut self, index: usize, grad: &[f64], _rate: f64, _step: usize) -> Vec<f64> {
    let (rho, eps) = (self.rho, self.epsilon);
    let acc_grad = self.grads.entry(index).or_insert_with(|| vec![0.0; grad.len()] );
    let acc_delta = self.deltas.entry(index).or_insert_with(|| vec![0.0; grad.len()] );
    itertools::izip!(grad, acc_grad.iter_mut(), acc_delta.iter_mut())
      .map(|(g, ag, ad)| {
        *ag = rho * *ag + (1.0 - rho) * g * g;
        let delta = -((*ad + eps) / (*ag + eps)).sqrt() * g;
        *ad = rho * *ad + (1.0 - rho) * delta * delta;
        delta
      })
      .collect()
  }
}


/// Adaptive moment estimation.
///
/// The moment estimates are scaled by `1 - β^step`.

#[derive(Debug, Clone)]
pub struct Adam {
  pub beta1: f64,
  pub beta2: f64,
  pub epsilon: f64,
  m: HashMap<usize, Vec<f64>>,
  v: HashMap<usize, Vec<f64>>,
}

impl Adam {
  pub fn new(beta1: f64, beta2: f64, epsilon: f64) -> Self {
    Self { beta1, beta2, epsilon, m: HashMap::new(), v: HashMap::new() }
  }
}

impl Default for Adam {
  fn default() -> Self {
    Self::new(0.9, 0.999, 1e-8)
  }
}

impl Strategy for Adam {
  fn update(&mut self, index: usize, grad: &[f64], rate: f64, step: usize) -> Vec<f64> {
    let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
    let scale1 = 1.0 - b1.powi(step as i32);
    let scale2 = 1.0 - b2.powi(step as i32);
    let m = self.m.entry(index).or_insert_with(|| vec![0.0; grad.len()] );
    let v = self.v.entry(index).or_insert_with(|| vec![0.0; grad.len()] );
    itertools::izip!(grad, m.iter_mut(), v.iter_mut())
      .map(|(g, m, v)| {
        *m = b1 * *m + (1.0 - b1) * g;
        *v = b2 * *v + (1.0 - b2) * g * g;
        let m_hat = *m * scale1;
        let v_hat = *v * scale2;
        -rate * m_hat / (v_hat.sqrt() + eps)
      })
      .collect()
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ tensor::Tensor, layer::Param };

  #[test]
  fn momentum() {
    let mut strategy = Momentum::new(0.5);
    assert_eq!(strategy.update(0, &[1.0, -2.0], 0.1, 1), vec![-0.1, 0.2]);
    let change = strategy.update(0, &[1.0, -2.0], 0.1, 2);
    assert!((change[0] + 0.15).abs() < 1e-12);
    assert!((change[1] - 0.3).abs() < 1e-12);
    // Independent state per parameter
    assert_eq!(strategy.update(1, &[1.0], 0.1, 2), vec![-0.1]);
  }

  #[test]
  fn adadelta() {
    let mut strategy = AdaDelta::new(0.95, 1e-8);
    let change = strategy.update(0, &[2.0], 1.0, 1);
    let acc_grad = 0.05 * 4.0;
    let expected = -((1e-8f64) / (acc_grad + 1e-8)).sqrt() * 2.0;
    assert!((change[0] - expected).abs() < 1e-15);
    assert!(change[0] < 0.0);
  }

  #[test]
  fn adam() {
    let mut strategy = Adam::default();
    let change = strategy.update(0, &[0.5], 0.01, 1);
    let m_hat: f64 = 0.1 * 0.5 * 0.1;
    let v_hat: f64 = 0.001 * 0.25 * 0.001;
    let expected = -0.01 * m_hat / (v_hat.sqrt() + 1e-8);
    assert!((change[0] - expected).abs() < 1e-12);
  }

  #[test]
  fn minimize_sums_workers() {
    let param = Param::new(Tensor::vec(&[1.0, 2.0]).unwrap());
    let mut grad_a = Tensor::vec(&[1.0, 0.0]).unwrap();
    let mut grad_b = Tensor::vec(&[3.0, 2.0]).unwrap();
    let mut optimizer = Optimizer::new(Box::new(Momentum::new(0.0)), 0.5);
    let mut workers = vec![
      vec![ParamGrad { param: param.clone(), grad: &mut grad_a }],
      vec![ParamGrad { param: param.clone(), grad: &mut grad_b }],
    ];
    optimizer.minimize(&mut workers, 4, 1.0).unwrap();
    drop(workers);
    // ((1 + 3) + 0.5 * 1) / 4 and ((0 + 2) + 0.5 * 2) / 4
    let values = param.read();
    assert!((values.values()[0] - (1.0 - 1.125)).abs() < 1e-12);
    assert!((values.values()[1] - (2.0 - 0.75)).abs() < 1e-12);
    assert!(grad_a.values().iter().chain(grad_b.values()).all(|&g| g == 0.0 ));
    assert_eq!(optimizer.step(), 2);
  }

  #[test]
  fn unshared_workers() {
    let mut grad_a = Tensor::vec(&[1.0]).unwrap();
    let mut grad_b = Tensor::vec(&[1.0]).unwrap();
    let mut optimizer = Optimizer::new(Box::new(Adam::default()), 0.0);
    let mut workers = vec![
      vec![ParamGrad { param: Param::new(Tensor::vec(&[0.0]).unwrap()), grad: &mut grad_a }],
      vec![ParamGrad { param: Param::new(Tensor::vec(&[0.0]).unwrap()), grad: &mut grad_b }],
    ];
    assert!(matches!(optimizer.minimize(&mut workers, 2, 0.1), Err(Error::State(_))));
  }
}
