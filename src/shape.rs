use crate::error::{Error, Result};


/// The shape of a [Tensor](crate::Tensor).
///
/// Dimension 0 varies fastest: it has stride 1, dimension 1 has a stride
/// equal to the size of dimension 0 and so on. The stride table is
/// computed once on construction.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
  dims: Vec<usize>,
  strides: Vec<usize>,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Result<Self> {
    if dims.is_empty() {
      return Err(Error::Shape("a shape needs at least one dimension".into()))
    }
    if dims.iter().any(|&n| n == 0 ) {
      return Err(Error::Shape(format!("dimensions must be bigger than zero, got {dims:?}")))
    }
    Ok(Self {
      dims: dims.to_vec(),
      strides: Self::make_strides(dims),
    })
  }

  fn make_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in 1..dims.len() {
      strides[i] = strides[i - 1] * dims[i - 1];
    }
    strides
  }

  pub fn dims(&self) -> &[usize] {
    &self.dims
  }

  pub fn strides(&self) -> &[usize] {
    &self.strides
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn contains(&self, indices: &[usize]) -> bool {
    indices.len() == self.rank() && indices.iter().zip(&self.dims).all(|(&i, &n)| i < n )
  }

  /// Position of `indices` in the flat value array.

  pub fn index(&self, indices: &[usize]) -> Result<usize> {
    if indices.len() != self.rank() {
      return Err(Error::Index(format!(
        "{} indices given for a tensor with {} dimensions", indices.len(), self.rank())))
    }
    if !self.contains(indices) {
      return Err(Error::Index(format!("{indices:?} is out of bounds for {self}")))
    }
    Ok(indices.iter()
      .zip(&self.strides)
      .map(|(&i, &s)| i * s )
      .sum())
  }

  /// Inverse of [index](Shape::index).

  pub fn coords(&self, index: usize) -> Result<Vec<usize>> {
    if index >= self.size() {
      return Err(Error::Index(format!("flat index {index} is out of bounds for {self}")))
    }
    let mut rest = index;
    let mut coords = vec![0; self.rank()];
    // Walk backward through dimensions
    for d in (0..self.rank()).rev() {
      coords[d] = rest / self.strides[d];
      rest %= self.strides[d];
    }
    Ok(coords)
  }

  /// Drop the `n` outermost dimensions.

  pub(crate) fn leading(&self, n: usize) -> Self {
    let rank = self.rank() - n;
    Self {
      dims: self.dims[..rank].to_vec(),
      strides: self.strides[..rank].to_vec(),
    }
  }
}

impl std::ops::Index<usize> for Shape {
  type Output = usize;

  fn index(&self, i: usize) -> &usize {
    &self.dims[i]
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Shape{:?}", self.dims)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strides() {
    let shape = Shape::new(&[3,2,2]).unwrap();
    assert_eq!(shape.strides, vec![1,3,6]);

    let shape = Shape::new(&[2,3,2]).unwrap();
    assert_eq!(shape.strides, vec![1,2,6]);
  }

  #[test]
  fn invalid() {
    assert!(matches!(Shape::new(&[]), Err(Error::Shape(_))));
    assert!(matches!(Shape::new(&[2,0,3]), Err(Error::Shape(_))));
  }

  #[test]
  fn index() {
    let shape = Shape::new(&[2,3]).unwrap();
    assert_eq!(shape.index(&[0,0]).unwrap(), 0);
    assert_eq!(shape.index(&[1,0]).unwrap(), 1);
    assert_eq!(shape.index(&[0,1]).unwrap(), 2);
    assert_eq!(shape.index(&[1,2]).unwrap(), 5);
    assert!(matches!(shape.index(&[2,0]), Err(Error::Index(_))));
    assert!(matches!(shape.index(&[1]), Err(Error::Index(_))));
  }

  #[test]
  fn coords_round_trip() {
    for dims in [vec![7], vec![3,4], vec![2,3,4], vec![5,1,2,3]] {
      let shape = Shape::new(&dims).unwrap();
      for i in 0..shape.size() {
        let coords = shape.coords(i).unwrap();
        assert_eq!(shape.index(&coords).unwrap(), i);
      }
      assert!(shape.coords(shape.size()).is_err());
    }
  }

  #[test]
  fn leading() {
    let shape = Shape::new(&[3,3,2,4]).unwrap().leading(1);
    assert_eq!(shape.dims(), &[3,3,2]);
    assert_eq!(shape.strides(), &[1,3,9]);
  }
}
