use crate::{
  error::{ Error, Result },
  layer::{ Layer, Convolutional, Relu, Pool },
};

use super::Network;


/// `convs` rounds of 3x3 convolution followed by ReLU, then 2x2 max pooling.
///
/// Convolutions keep width and height, so both have to be even.

pub fn crp_block(input: [usize; 3], convs: usize, kernels: usize) -> Result<Network> {
  if input[0] % 2 != 0 || input[1] % 2 != 0 {
    return Err(Error::Config(format!("Block input {input:?} has to be divisible by 2")))
  }
  let mut layers: Vec<Box<dyn Layer>> = vec![];
  let mut size = input;
  for _ in 0..convs {
    let conv = Convolutional::try_new(size, kernels, [1,1], [1,1], [1,1])?;
    let relu = Relu::try_with_slope(conv.output_shape(), 0.0)?;
    layers.push(Box::new(conv));
    layers.push(Box::new(relu));
    size[2] = kernels;
  }
  layers.push(Box::new(Pool::try_new(&size, &[2,2,1])?));
  Network::sequential(layers)
}

/// `blocks` consecutive [crp_block]s, each halving width and height.

pub fn crp_blocks(input: [usize; 3], convs: usize, kernels: usize, blocks: usize) -> Result<Network> {
  let mut layers: Vec<Box<dyn Layer>> = vec![];
  let mut size = input;
  for _ in 0..blocks {
    let block = crp_block(size, convs, kernels)?;
    let out = block.output_shape();
    size = [out[0], out[1], out[2]];
    layers.push(Box::new(block));
  }
  Network::sequential(layers)
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::Tensor;

  #[test]
  fn shapes() {
    let block = crp_block([8,8,1], 2, 4).unwrap();
    assert_eq!(block.len(), 5);
    assert_eq!(block.input_shape(), &[8,8,1]);
    assert_eq!(block.output_shape(), &[4,4,4]);

    let mut blocks = crp_blocks([8,8,3], 1, 2, 2).unwrap();
    assert_eq!(blocks.output_shape(), &[2,2,2]);
    let output = blocks.activate(&Tensor::fill(&[8,8,3], 0.5).unwrap()).unwrap();
    assert_eq!(output.dims(), &[2,2,2]);
  }

  #[test]
  fn odd_input() {
    assert!(matches!(crp_block([7,8,1], 1, 4), Err(Error::Config(_))));
    assert!(crp_blocks([12,12,1], 1, 4, 3).is_err());
  }
}
