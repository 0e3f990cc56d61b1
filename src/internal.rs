use std::cell::RefCell;

use rand::{Rng, SeedableRng, rngs::StdRng};


thread_local! {
  static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Reseed the random generator of the calling thread.
///
/// Weight initialization and layer IDs draw from this generator, so
/// networks built on the same thread after the same seed are identical.

pub fn seed(seed: u64) {
  RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed) );
}

pub(crate) fn with_rng<O>(cb: impl FnOnce(&mut StdRng) -> O) -> O {
  RNG.with(|rng| cb(&mut rng.borrow_mut()) )
}


// Polar Box-Muller transformation

pub(crate) fn randn() -> (f64, f64) {
  loop {
    let (u, v) = with_rng(|rng| (rng.gen_range(-1.0f64, 1.0), rng.gen_range(-1.0f64, 1.0)) );
    let r = u * u + v * v;
    // Try again if outside interval
    if r == 0.0 || r >= 1.0 { continue }
    let c = (-2.0 * r.ln() / r).sqrt();
    return (u * c, v * c)
  }
}

pub(crate) fn normal_vec(len: usize, stdev: f64) -> Vec<f64> {
  let mut data = vec![0.0; len];
  for i in 0..(len + 1) / 2 {
    let j = i * 2;
    let (r1, r2) = randn();
    data[j] = r1 * stdev;
    if j + 1 < len { data[j + 1] = r2 * stdev }
  }
  data
}

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub(crate) fn random_id(prefix: &str) -> String {
  let suffix: String = with_rng(|rng| {
    (0..8).map(|_| LETTERS[rng.gen_range(0, LETTERS.len())] as char ).collect()
  });
  format!("{prefix}-{suffix}")
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn seeded_ids_repeat() {
    seed(7);
    let a = random_id("Dense");
    seed(7);
    let b = random_id("Dense");
    assert_eq!(a, b);
    assert!(a.starts_with("Dense-"));
    assert_eq!(a.len(), "Dense-".len() + 8);
  }

  #[test]
  fn normal_samples() {
    seed(1);
    let data = normal_vec(20001, 2.0);
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let var = data.iter().map(|x| (x - mean).powi(2) ).sum::<f64>() / data.len() as f64;
    assert!(mean.abs() < 0.1);
    assert!((var.sqrt() - 2.0).abs() < 0.1);
  }
}
