/// Row-major matrix product accumulated onto `c`.
///
/// Computes `c += a · b` where `a` is `m × k`, `b` is `k × n` and `c` is `m × n`.

pub(crate) fn gemm_acc(m: usize, k: usize, n: usize, a: &[f64], b: &[f64], c: &mut [f64]) {
  // The accelerated kernel works on raw pointers
  assert_eq!(a.len(), m * k);
  assert_eq!(b.len(), k * n);
  assert_eq!(c.len(), m * n);
  kernel(m, k, n, a, b, c)
}

#[cfg(feature = "unsafe")]
fn kernel(m: usize, k: usize, n: usize, a: &[f64], b: &[f64], c: &mut [f64]) {
  unsafe {
    matrixmultiply::dgemm(
      m,
      k,
      n,
      1.0,
      a.as_ptr(),
      k as isize,
      1,
      b.as_ptr(),
      n as isize,
      1,
      1.0,
      c.as_mut_ptr(),
      n as isize,
      1,
    );
  }
}

#[cfg(not(feature = "unsafe"))]
fn kernel(m: usize, k: usize, n: usize, a: &[f64], b: &[f64], c: &mut [f64]) {
  for i in 0..m {
    for p in 0..k {
      let lhs = a[i * k + p];
      if lhs == 0.0 { continue }
      let row = &b[p * n..(p + 1) * n];
      c[i * n..(i + 1) * n].iter_mut()
        .zip(row)
        .for_each(|(out, rhs)| *out += lhs * rhs );
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accumulates() {
    let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
    let mut c = [1.0, 1.0, 1.0, 1.0];
    gemm_acc(2, 3, 2, &a, &b, &mut c);
    assert_eq!(c, [59.0, 65.0, 140.0, 155.0]);
  }

  #[test]
  #[should_panic]
  fn short_output() {
    let a = [1.0; 6];
    let b = [1.0; 6];
    let mut c = [0.0; 3];
    gemm_acc(2, 3, 2, &a, &b, &mut c);
  }
}
