use serde::{ Serialize, Deserialize };

use crate::{
  error::{ Error, Result },
  tensor::{ Tensor, cops },
  marshal::{ Archive, Registry },
  debug::LayerInfo,
  internal,
};

use super::{ Layer, Param, ParamGrad, Base, BaseInfo, or_panic };


/// 2D convolution over a `[width, height, depth]` volume.
///
/// Kernels have odd sizes `2 · kernel_pad + 1` in each direction. The output
/// has shape `[out_width, out_height, kernels]`. Weights are stored as
/// `[kernel_width, kernel_height, depth, kernels]`, one bias per kernel.

#[derive(Debug)]
pub struct Convolutional {
  base: Base,
  geometry: Geometry,
  weights: Param,
  bias: Param,
  weights_grad: Tensor,
  bias_grad: Tensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Geometry {
  input: [usize; 3],
  kernels: usize,
  kernel_pad: [usize; 2],
  stride: [usize; 2],
  padding: [usize; 2],
}

impl Geometry {
  fn kernel_size(&self) -> [usize; 2] {
    [self.kernel_pad[0] * 2 + 1, self.kernel_pad[1] * 2 + 1]
  }

  fn output(&self) -> [usize; 3] {
    let [kw, kh] = self.kernel_size();
    [
      (self.input[0] + 2 * self.padding[0] - kw) / self.stride[0] + 1,
      (self.input[1] + 2 * self.padding[1] - kh) / self.stride[1] + 1,
      self.kernels,
    ]
  }

  // Rows of the im2col matrix
  fn patch_len(&self) -> usize {
    let [kw, kh] = self.kernel_size();
    kw * kh * self.input[2]
  }

  fn validate(&self) -> Result<()> {
    super::check_dims("Convolution input", &self.input)?;
    if self.kernels == 0 {
      return Err(Error::Config("Convolution needs at least one kernel".into()))
    }
    let kernel = self.kernel_size();
    for d in 0..2 {
      if self.stride[d] == 0 {
        return Err(Error::Config("Convolution stride must be positive".into()))
      }
      if self.padding[d] > self.kernel_pad[d] {
        return Err(Error::Config(format!(
          "Padding {:?} exceeds kernel pad {:?}", self.padding, self.kernel_pad)))
      }
      let padded = self.input[d] + 2 * self.padding[d];
      if kernel[d] > padded {
        return Err(Error::Config(format!(
          "Kernel {:?} doesn't fit into input {:?} with padding {:?}", kernel, self.input, self.padding)))
      }
      if (padded - kernel[d]) % self.stride[d] != 0 {
        return Err(Error::Config(format!(
          "Stride {:?} doesn't tile input {:?} with padding {:?} and kernel {:?}",
          self.stride, self.input, self.padding, kernel)))
      }
    }
    Ok(())
  }

  // Input coordinate touched by kernel offset `k` at output position `o`
  // in dimension `d`, if it lies inside the unpadded input.
  fn source(&self, d: usize, o: usize, k: usize) -> Option<usize> {
    (o * self.stride[d] + k).checked_sub(self.padding[d]).filter(|&x| x < self.input[d] )
  }

  /// Unroll all input patches into a `patch_len × positions` matrix.

  fn im2col(&self, input: &[f64]) -> Vec<f64> {
    let [w, h, depth] = self.input;
    let [kw, kh] = self.kernel_size();
    let [ow, oh, _] = self.output();
    let positions = ow * oh;
    let mut col = vec![0.0; self.patch_len() * positions];
    for c in 0..depth {
      for ky in 0..kh {
        for kx in 0..kw {
          let row = (c * kh + ky) * kw + kx;
          for oy in 0..oh {
            let Some(y) = self.source(1, oy, ky) else { continue };
            for ox in 0..ow {
              let Some(x) = self.source(0, ox, kx) else { continue };
              col[row * positions + oy * ow + ox] = input[x + y * w + c * w * h];
            }
          }
        }
      }
    }
    col
  }
}

impl Convolutional {
  pub const KIND: &'static str = "convolutional";

  pub fn try_new(
    input: [usize; 3],
    kernels: usize,
    kernel_pad: [usize; 2],
    stride: [usize; 2],
    padding: [usize; 2],
  ) -> Result<Self> {
    let geometry = Geometry { input, kernels, kernel_pad, stride, padding };
    geometry.validate()?;
    let [kw, kh] = geometry.kernel_size();
    let size = geometry.patch_len() * kernels;
    let stdev = (2.0 / geometry.patch_len() as f64).sqrt();
    let weights = Tensor::new(&[kw, kh, input[2], kernels], internal::normal_vec(size, stdev))?;
    let bias = Tensor::zeros(&[kernels])?;
    let base = Base::new("Conv", &input, &geometry.output());
    Self::build(base, geometry, weights, bias)
  }

  pub fn new(
    input: [usize; 3],
    kernels: usize,
    kernel_pad: [usize; 2],
    stride: [usize; 2],
    padding: [usize; 2],
  ) -> Self {
    or_panic(Self::try_new(input, kernels, kernel_pad, stride, padding))
  }

  /// Same kernel pad, stride and padding in both directions.

  pub fn square(input: [usize; 3], kernels: usize, kernel_pad: usize, stride: usize, padding: usize) -> Self {
    Self::new(input, kernels, [kernel_pad; 2], [stride; 2], [padding; 2])
  }

  fn build(base: Base, geometry: Geometry, weights: Tensor, bias: Tensor) -> Result<Self> {
    Ok(Self {
      base,
      geometry,
      weights_grad: weights.zeroed(),
      bias_grad: bias.zeroed(),
      weights: Param::new(weights),
      bias: Param::new(bias),
    })
  }

  pub fn weights(&self) -> &Param {
    &self.weights
  }

  pub fn bias(&self) -> &Param {
    &self.bias
  }

  pub fn unmarshal(archive: &Archive, _registry: &Registry) -> Result<Box<dyn Layer>> {
    let info: ConvInfo = archive.info()?;
    info.geometry.validate()?;
    if info.base.input_shape != info.geometry.input || info.base.output_shape != info.geometry.output() {
      return Err(Error::Shape(format!(
        "Stored shapes {:?} -> {:?} of {} don't match its geometry",
        info.base.input_shape, info.base.output_shape, info.base.id)))
    }
    let weights = archive.tensor("weights")?;
    let bias = archive.tensor("bias")?;
    let [kw, kh] = info.geometry.kernel_size();
    let kernels = info.geometry.kernels;
    if !weights.has_shape(&[kw, kh, info.geometry.input[2], kernels]) || !bias.has_shape(&[kernels]) {
      return Err(Error::Shape(format!("Stored parameters of {} don't match its kernels", info.base.id)))
    }
    let base = Base::with_id(info.base.id, &info.base.input_shape, &info.base.output_shape);
    Ok(Box::new(Self::build(base, info.geometry, weights, bias)?))
  }
}

impl Layer for Convolutional {
  fn id(&self) -> &str { &self.base.id }
  fn kind(&self) -> &'static str { Self::KIND }
  fn input_shape(&self) -> &[usize] { &self.base.input_shape }
  fn output_shape(&self) -> &[usize] { &self.base.output_shape }

  fn activate(&mut self, input: &Tensor) -> Result<Tensor> {
    self.base.check_input(input)?;
    let g = &self.geometry;
    let [ow, oh, kernels] = g.output();
    let positions = ow * oh;
    let col = g.im2col(input.values());

    // Start from bias and let the matrix product accumulate on top
    let mut output = Tensor::zeros(&self.base.output_shape)?;
    {
      let bias = self.bias.read();
      for (k, chunk) in output.values_mut().chunks_mut(positions).enumerate() {
        chunk.iter_mut().for_each(|o| *o = bias.values()[k] );
      }
      let weights = self.weights.read();
      cops::gemm_acc(kernels, g.patch_len(), positions, weights.values(), &col, output.values_mut());
    }

    self.base.input = Some(input.clone());
    self.base.output = Some(output.clone());
    Ok(output)
  }

  fn back_propagate(&mut self, grad: &Tensor) -> Result<Tensor> {
    self.base.check_grad(grad)?;
    let g = self.geometry;
    let input = self.base.last_input()?;
    let [w, h, depth] = g.input;
    let [kw, kh] = g.kernel_size();
    let [ow, oh, kernels] = g.output();
    let patch = g.patch_len();
    let mut propagation = Tensor::zeros(&self.base.input_shape)?;
    {
      let weights = self.weights.read();
      let (wv, x) = (weights.values(), input.values());
      let wg = self.weights_grad.values_mut();
      let bg = self.bias_grad.values_mut();
      let p = propagation.values_mut();
      for k in 0..kernels {
        for oy in 0..oh {
          for ox in 0..ow {
            let gv = grad.values()[ox + oy * ow + k * ow * oh];
            bg[k] += gv;
            if gv == 0.0 { continue }
            for c in 0..depth {
              for ky in 0..kh {
                // Padding contributes nothing
                let Some(y) = g.source(1, oy, ky) else { continue };
                for kx in 0..kw {
                  let Some(xx) = g.source(0, ox, kx) else { continue };
                  let wi = (c * kh + ky) * kw + kx + k * patch;
                  let xi = xx + y * w + c * w * h;
                  p[xi] += gv * wv[wi];
                  wg[wi] += gv * x[xi];
                }
              }
            }
          }
        }
      }
    }
    self.base.propagation = Some(propagation.clone());
    Ok(propagation)
  }

  fn enslave(&self) -> Box<dyn Layer> {
    Box::new(Self {
      base: self.base.enslave(),
      geometry: self.geometry,
      weights: self.weights.clone(),
      bias: self.bias.clone(),
      weights_grad: self.weights_grad.zeroed(),
      bias_grad: self.bias_grad.zeroed(),
    })
  }

  fn param_grads(&mut self) -> Vec<ParamGrad<'_>> {
    vec![
      ParamGrad { param: self.bias.clone(), grad: &mut self.bias_grad },
      ParamGrad { param: self.weights.clone(), grad: &mut self.weights_grad },
    ]
  }

  fn marshal(&self) -> Result<Archive> {
    let mut archive = Archive::new();
    archive.put_info(&ConvInfo { base: BaseInfo::from(&self.base), geometry: self.geometry })?;
    archive.put_tensor("bias", &self.bias.read())?;
    archive.put_tensor("weights", &self.weights.read())?;
    Ok(archive)
  }

  fn debug_info(&self) -> Vec<LayerInfo> {
    vec![self.base.info(Self::KIND, Some(&self.weights), Some(&self.bias))]
  }
}


#[derive(Debug, Serialize, Deserialize)]
struct ConvInfo {
  base: BaseInfo,
  geometry: Geometry,
}
