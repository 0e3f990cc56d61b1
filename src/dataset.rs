use parking_lot::Mutex;

use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  layer::Layer,
  cost::CostFunction,
};


/// Source of labeled examples.
///
/// `next_set` is called concurrently by training workers and must
/// serialize access internally. After `reset` the first example comes next.

pub trait Dataset: Send + Sync {
  fn data_shape(&self) -> Vec<usize>;
  fn answer_shape(&self) -> Vec<usize>;
  fn set_size(&self) -> usize;

  /// Next input and expected answer, or [Error::EndOfData].
  fn next_set(&self) -> Result<(Tensor, Tensor)>;

  fn reset(&self);

  fn close(&self) {}

  /// Whether `output` counts as a correct answer for `answer`.
  fn is_correct(&self, output: &Tensor, answer: &Tensor) -> bool;
}


/// A training set together with its held-out test set.

pub struct PairSet {
  pub train: Box<dyn Dataset>,
  pub test: Box<dyn Dataset>,
}

impl PairSet {
  pub fn new(train: impl Dataset + 'static, test: impl Dataset + 'static) -> Self {
    Self { train: Box::new(train), test: Box::new(test) }
  }

  pub fn close(&self) {
    self.train.close();
    self.test.close();
  }
}

impl std::fmt::Debug for PairSet {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.debug_struct("PairSet")
      .field("train", &self.train.set_size())
      .field("test", &self.test.set_size())
      .finish()
  }
}


/// In-memory dataset of tensor pairs for classification.
///
/// An output is correct when its greatest value sits where the answer's does.

#[derive(Debug)]
pub struct TensorSet {
  data: Vec<Tensor>,
  answers: Vec<Tensor>,
  cursor: Mutex<usize>,
}

impl TensorSet {
  pub fn new(data: Vec<Tensor>, answers: Vec<Tensor>) -> Result<Self> {
    if data.is_empty() || data.len() != answers.len() {
      return Err(Error::Config(format!(
        "Need as many answers as inputs, got {} and {}", data.len(), answers.len())))
    }
    let consistent = |set: &[Tensor]| set.iter().all(|t| t.shape() == set[0].shape() );
    if !consistent(&data) || !consistent(&answers) {
      return Err(Error::Shape("All examples of a set need the same shape".into()))
    }
    Ok(Self { data, answers, cursor: Mutex::new(0) })
  }
}

impl Dataset for TensorSet {
  fn data_shape(&self) -> Vec<usize> {
    self.data[0].dims().to_vec()
  }

  fn answer_shape(&self) -> Vec<usize> {
    self.answers[0].dims().to_vec()
  }

  fn set_size(&self) -> usize {
    self.data.len()
  }

  fn next_set(&self) -> Result<(Tensor, Tensor)> {
    let mut cursor = self.cursor.lock();
    if *cursor >= self.data.len() {
      return Err(Error::EndOfData)
    }
    let i = *cursor;
    *cursor += 1;
    Ok((self.data[i].clone(), self.answers[i].clone()))
  }

  fn reset(&self) {
    *self.cursor.lock() = 0;
  }

  fn is_correct(&self, output: &Tensor, answer: &Tensor) -> bool {
    output.max().0 == answer.max().0
  }
}


/// Fraction of the dataset `layer` answers correctly.

pub fn accuracy(layer: &mut dyn Layer, data: &dyn Dataset) -> Result<f64> {
  evaluate(layer, None, data).map(|(accuracy, _)| accuracy )
}

/// Accuracy and mean loss over the whole dataset, running forward passes only.

pub fn evaluate(
  layer: &mut dyn Layer,
  mut cost: Option<&mut dyn CostFunction>,
  data: &dyn Dataset,
) -> Result<(f64, f64)> {
  data.reset();
  let n = data.set_size();
  let mut correct = 0;
  let mut loss = 0.0;
  for _ in 0..n {
    let (input, answer) = data.next_set()?;
    let output = layer.activate(&input)?;
    if data.is_correct(&output, &answer) { correct += 1 }
    if let Some(cost) = cost.as_deref_mut() {
      loss += cost.cost(&output, &answer)?;
    }
  }
  data.reset();
  Ok((correct as f64 / n as f64, loss / n as f64))
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::layer::Reshaper;

  fn one_hot(i: usize) -> Tensor {
    let mut t = Tensor::zeros(&[3]).unwrap();
    t.values_mut()[i] = 1.0;
    t
  }

  fn set() -> TensorSet {
    TensorSet::new(
      vec![one_hot(0), one_hot(1), one_hot(2)],
      vec![one_hot(0), one_hot(2), one_hot(2)],
    ).unwrap()
  }

  #[test]
  fn iterate() {
    let set = set();
    assert_eq!(set.set_size(), 3);
    assert_eq!(set.data_shape(), vec![3]);
    for i in 0..3 {
      assert_eq!(set.next_set().unwrap().0, one_hot(i));
    }
    assert!(matches!(set.next_set(), Err(Error::EndOfData)));
    set.reset();
    assert_eq!(set.next_set().unwrap().0, one_hot(0));
  }

  #[test]
  fn concurrent_access() {
    let set = TensorSet::new(
      (0..100).map(|i| Tensor::vec(&[i as f64]).unwrap() ).collect(),
      (0..100).map(|_| Tensor::vec(&[0.0]).unwrap() ).collect(),
    ).unwrap();
    let mut seen: Vec<f64> = std::thread::scope(|s| {
      let handles: Vec<_> = (0..4).map(|_| s.spawn(|| {
        (0..25).map(|_| set.next_set().unwrap().0.values()[0] ).collect::<Vec<_>>()
      })).collect();
      handles.into_iter().flat_map(|h| h.join().unwrap() ).collect()
    });
    seen.sort_by(|a, b| a.partial_cmp(b).unwrap() );
    assert_eq!(seen, (0..100).map(|i| i as f64 ).collect::<Vec<_>>());
  }

  #[test]
  fn measure_accuracy() {
    let set = set();
    let mut identity = Reshaper::new(&[3], &[3]);
    assert!((accuracy(&mut identity, &set).unwrap() - 2.0 / 3.0).abs() < 1e-12);
  }

  #[test]
  fn invalid() {
    assert!(TensorSet::new(vec![one_hot(0)], vec![]).is_err());
    assert!(TensorSet::new(vec![one_hot(0), Tensor::zeros(&[2]).unwrap()], vec![one_hot(0), one_hot(1)]).is_err());
  }
}
