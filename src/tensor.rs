use serde::{Serialize, Deserialize};

pub(crate) mod cops;

use crate::{
  error::{Error, Result},
  shape::Shape,
};


/// Dense multidimensional array of `f64`.
///
/// Values are stored flat, with dimension 0 varying fastest.
/// The number of values always equals the product of the dimensions
/// and a tensor never changes its size after allocation.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "TensorDump", try_from = "TensorDump")]
pub struct Tensor {
  shape: Shape,
  values: Vec<f64>,
}

impl Tensor {
  pub fn from_shape(shape: Shape, values: Vec<f64>) -> Result<Self> {
    if shape.size() != values.len() {
      return Err(Error::Shape(format!("{} doesn't match data length {}", shape, values.len())))
    }
    Ok(Self { shape, values })
  }

  pub fn new(dims: &[usize], values: Vec<f64>) -> Result<Self> {
    Self::from_shape(Shape::new(dims)?, values)
  }

  /// Allocate a zero filled tensor.

  pub fn zeros(dims: &[usize]) -> Result<Self> {
    Self::fill(dims, 0.0)
  }

  pub fn fill(dims: &[usize], filler: f64) -> Result<Self> {
    let shape = Shape::new(dims)?;
    let values = vec![filler; shape.size()];
    Ok(Self { shape, values })
  }

  /// Zero filled tensor of the same shape.

  pub fn zeroed(&self) -> Self {
    Self { shape: self.shape.clone(), values: vec![0.0; self.len()] }
  }

  pub fn vec(values: &[f64]) -> Result<Self> {
    Self::new(&[values.len()], values.to_vec())
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    self.shape.dims()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn values_mut(&mut self) -> &mut [f64] {
    &mut self.values
  }

  pub fn into_values(self) -> Vec<f64> {
    self.values
  }

  pub fn has_shape(&self, dims: &[usize]) -> bool {
    self.shape.dims() == dims
  }

  pub fn flat_index(&self, indices: &[usize]) -> Result<usize> {
    self.shape.index(indices)
  }

  pub fn coords(&self, index: usize) -> Result<Vec<usize>> {
    self.shape.coords(index)
  }

  pub fn get(&self, indices: &[usize]) -> Result<f64> {
    Ok(self.values[self.shape.index(indices)?])
  }

  pub fn set(&mut self, indices: &[usize], value: f64) -> Result<()> {
    let i = self.shape.index(indices)?;
    self.values[i] = value;
    Ok(())
  }

  /// Set every value to `filler`.

  pub fn refill(&mut self, filler: f64) {
    self.values.iter_mut().for_each(|a| *a = filler );
  }

  /// Add all `others` to this tensor, element by element.
  ///
  /// Nothing gets modified unless every operand has the same shape.

  pub fn add(&mut self, others: &[&Tensor]) -> Result<()> {
    if let Some(other) = others.iter().find(|other| other.shape != self.shape ) {
      return Err(Error::Shape(format!("Cannot add {} tensor to {} tensor", other.shape, self.shape)))
    }
    for other in others {
      self.values.iter_mut()
        .zip(&other.values)
        .for_each(|(a, b)| *a += b );
    }
    Ok(())
  }

  pub fn subtract(&mut self, other: &Tensor) -> Result<()> {
    if other.shape != self.shape {
      return Err(Error::Shape(format!("Cannot subtract {} tensor from {} tensor", other.shape, self.shape)))
    }
    self.values.iter_mut()
      .zip(&other.values)
      .for_each(|(a, b)| *a -= b );
    Ok(())
  }

  pub fn scale(&mut self, factor: f64) {
    self.values.iter_mut().for_each(|a| *a *= factor );
  }

  /// Relabel the values under a different shape of equal size.

  pub fn reshape(self, dims: &[usize]) -> Result<Self> {
    let shape = Shape::new(dims)?;
    if shape.size() != self.len() {
      return Err(Error::Shape(format!("Cannot reshape {} tensor to {}", self.shape, shape)))
    }
    Ok(Self { shape, values: self.values })
  }

  /// Fix the outermost dimensions and view the remaining ones.
  ///
  /// Indices are given outermost first, so slicing a `[w, h, depth, n]`
  /// tensor with `&[k]` returns the `[w, h, depth]` block at `k`.

  pub fn slice(&self, indices: &[usize]) -> Result<TensorView> {
    let (shape, range) = self.slice_range(indices)?;
    Ok(TensorView { shape, values: &self.values[range] })
  }

  pub fn slice_mut(&mut self, indices: &[usize]) -> Result<TensorViewMut> {
    let (shape, range) = self.slice_range(indices)?;
    Ok(TensorViewMut { shape, values: &mut self.values[range] })
  }

  fn slice_range(&self, indices: &[usize]) -> Result<(Shape, std::ops::Range<usize>)> {
    let rank = self.rank();
    if indices.len() >= rank {
      return Err(Error::Index(format!(
        "Cannot slice {} indices out of a tensor with {} dimensions", indices.len(), rank)))
    }
    let mut offset = 0;
    for (k, &i) in indices.iter().enumerate() {
      let d = rank - 1 - k;
      if i >= self.shape[d] {
        return Err(Error::Index(format!("slice index {i} is out of bounds for {}", self.shape)))
      }
      offset += i * self.shape.strides()[d];
    }
    let shape = self.shape.leading(indices.len());
    let size = shape.size();
    Ok((shape, offset..offset + size))
  }

  pub fn is_finite(&self) -> bool {
    self.values.iter().all(|a| a.is_finite() )
  }

  /// Index and value of the greatest element. Ties keep the first one.

  pub fn max(&self) -> (usize, f64) {
    self.extreme(|a, b| a > b )
  }

  /// Index and value of the smallest element. Ties keep the first one.

  pub fn min(&self) -> (usize, f64) {
    self.extreme(|a, b| a < b )
  }

  /// Index and value of the element with the greatest magnitude.

  pub fn max_abs(&self) -> (usize, f64) {
    self.extreme(|a, b| a.abs() > b.abs() )
  }

  fn extreme(&self, better: impl Fn(f64, f64) -> bool) -> (usize, f64) {
    let mut index = 0;
    let mut best = self.values[0];
    for (i, &a) in self.values.iter().enumerate().skip(1) {
      if better(a, best) {
        best = a;
        index = i;
      }
    }
    (index, best)
  }

  pub fn mean(&self) -> f64 {
    self.values.iter().sum::<f64>() / self.len() as f64
  }

  /// Sample standard deviation.

  pub fn stddev(&self) -> f64 {
    let n = self.len();
    if n < 2 { return 0.0 }
    let mean = self.mean();
    let total: f64 = self.values.iter().map(|a| (a - mean).powi(2) ).sum();
    (total / (n - 1) as f64).sqrt()
  }

  pub fn stats(&self) -> Stats {
    Stats {
      mean: self.mean(),
      stddev: self.stddev(),
      min: self.min().1,
      max: self.max().1,
    }
  }
}

impl std::fmt::Display for Tensor {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} ", self.dims())?;
    print_chunks(self.rank() - 1, self.dims(), &self.values, f)
  }
}

fn print_chunks(dim: usize, dims: &[usize], vec: &[f64], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = (0..(dims.len() - 1 - dim) * 2).map(|_| " ").collect::<String>();
  if dim == 0 {
    write!(f, "{indent}{:?}\n", vec)?;
  } else {
    write!(f, "{indent}[\n")?;
    for chunk in vec.chunks(vec.len() / dims[dim]) {
      print_chunks(dim - 1, dims, chunk, f)?;
    }
    write!(f, "{indent}]\n")?;
  }
  Ok(())
}


/// Summary statistics over all values of a tensor.

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
  pub mean: f64,
  pub stddev: f64,
  pub min: f64,
  pub max: f64,
}


/// Read-only window into a block of a [Tensor].

#[derive(Debug)]
pub struct TensorView<'a> {
  shape: Shape,
  values: &'a [f64],
}

impl<'a> TensorView<'a> {
  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn values(&self) -> &'a [f64] {
    self.values
  }

  pub fn get(&self, indices: &[usize]) -> Result<f64> {
    Ok(self.values[self.shape.index(indices)?])
  }

  pub fn to_tensor(&self) -> Tensor {
    Tensor { shape: self.shape.clone(), values: self.values.to_vec() }
  }
}


/// Mutable window into a block of a [Tensor].

#[derive(Debug)]
pub struct TensorViewMut<'a> {
  shape: Shape,
  values: &'a mut [f64],
}

impl<'a> TensorViewMut<'a> {
  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn values(&self) -> &[f64] {
    self.values
  }

  pub fn values_mut(&mut self) -> &mut [f64] {
    self.values
  }

  pub fn get(&self, indices: &[usize]) -> Result<f64> {
    Ok(self.values[self.shape.index(indices)?])
  }

  pub fn set(&mut self, indices: &[usize], value: f64) -> Result<()> {
    let i = self.shape.index(indices)?;
    self.values[i] = value;
    Ok(())
  }
}


#[derive(Serialize, Deserialize)]
struct TensorDump {
  dims: Vec<usize>,
  values: Vec<f64>,
}

impl From<Tensor> for TensorDump {
  fn from(tensor: Tensor) -> Self {
    Self { dims: tensor.dims().to_vec(), values: tensor.values }
  }
}

impl TryFrom<TensorDump> for Tensor {
  type Error = Error;

  fn try_from(dump: TensorDump) -> Result<Self> {
    Tensor::new(&dump.dims, dump.values)
  }
}
