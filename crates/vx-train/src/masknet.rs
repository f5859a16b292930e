//! Convolutional soft-mask network (candle)
//!
//! Three 3×3 conv layers predict a sigmoid mask over the normalized mixture
//! magnitude; the vocal estimate is `mask * mixture`. Small enough to train
//! on CPU and serves as the reference [`TrainableModel`].

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{conv2d, AdamW, Conv2d, Conv2dConfig, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ndarray::Array4;
use vx_spectral::{SeparationModel, SpectralError, SpectralResult};

use crate::error::{TrainError, TrainResult};
use crate::model::TrainableModel;

/// MaskNet configuration
#[derive(Debug, Clone)]
pub struct MaskNetConfig {
    /// Audio channels of the spectrogram
    pub channels: usize,
    /// Hidden feature maps
    pub hidden: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
}

impl Default for MaskNetConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            hidden: 16,
            learning_rate: 1e-4,
            weight_decay: 0.0,
        }
    }
}

/// Soft-mask separation network
pub struct MaskNet {
    varmap: VarMap,
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    optimizer: AdamW,
    device: Device,
}

impl MaskNet {
    pub fn new(config: MaskNetConfig) -> TrainResult<Self> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let same = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = conv2d(config.channels, config.hidden, 3, same, vb.pp("conv1"))?;
        let conv2 = conv2d(config.hidden, config.hidden, 3, same, vb.pp("conv2"))?;
        let conv3 = conv2d(config.hidden, config.channels, 3, same, vb.pp("conv3"))?;

        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;

        log::info!(
            "MaskNet: {} channel(s), {} hidden, lr {:.1e}",
            config.channels,
            config.hidden,
            config.learning_rate
        );

        Ok(Self {
            varmap,
            conv1,
            conv2,
            conv3,
            optimizer,
            device,
        })
    }

    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let x = self.conv1.forward(input)?.relu()?;
        let x = self.conv2.forward(&x)?.relu()?;
        let mask = candle_nn::ops::sigmoid(&self.conv3.forward(&x)?)?;
        mask.mul(input)
    }

    fn to_tensor(&self, array: &Array4<f32>) -> candle_core::Result<Tensor> {
        let data: Vec<f32> = array.iter().copied().collect();
        Tensor::from_vec(data, array.shape(), &self.device)
    }

    fn to_array(tensor: &Tensor) -> TrainResult<Array4<f32>> {
        let dims = tensor.dims4()?;
        let data = tensor.flatten_all()?.to_vec1::<f32>()?;
        Array4::from_shape_vec(dims, data).map_err(|e| TrainError::Model(e.to_string()))
    }

    /// Scale gradients so their global L2 norm is at most `max_norm`
    fn clip_gradients(
        &self,
        grads: &mut candle_core::backprop::GradStore,
        max_norm: f32,
    ) -> TrainResult<f32> {
        let vars = self.varmap.all_vars();
        let mut sum_sq = 0.0f32;
        for var in &vars {
            if let Some(g) = grads.get(var) {
                sum_sq += g.sqr()?.sum_all()?.to_scalar::<f32>()?;
            }
        }
        let norm = sum_sq.sqrt();

        if norm > max_norm {
            let scale = (max_norm / (norm + 1e-6)) as f64;
            for var in &vars {
                if let Some(g) = grads.remove(var) {
                    grads.insert(var, g.affine(scale, 0.0)?);
                }
            }
        }
        Ok(norm)
    }
}

impl SeparationModel for MaskNet {
    fn infer(&self, input: &Array4<f32>) -> SpectralResult<Array4<f32>> {
        let model_err = |e: candle_core::Error| SpectralError::Model(e.to_string());
        let x = self.to_tensor(input).map_err(model_err)?;
        let y = self.forward(&x).map_err(model_err)?;
        Self::to_array(&y).map_err(|e| SpectralError::Model(e.to_string()))
    }

    fn name(&self) -> &str {
        "masknet"
    }
}

impl TrainableModel for MaskNet {
    fn train_step(
        &mut self,
        input: &Array4<f32>,
        target: &Array4<f32>,
        max_grad_norm: Option<f32>,
    ) -> TrainResult<f64> {
        let x = self.to_tensor(input)?;
        let y = self.to_tensor(target)?;

        let prediction = self.forward(&x)?;
        let loss = candle_nn::loss::mse(&prediction, &y)?;
        let mut grads = loss.backward()?;

        if let Some(max_norm) = max_grad_norm {
            let norm = self.clip_gradients(&mut grads, max_norm)?;
            log::trace!("grad norm {:.4}", norm);
        }
        self.optimizer.step(&grads)?;

        Ok(loss.to_scalar::<f32>()? as f64)
    }

    fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_learning_rate(lr);
    }

    fn save(&self, path: &Path) -> TrainResult<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> TrainResult<()> {
        self.varmap.load(path)?;
        Ok(())
    }

    fn weights_extension(&self) -> &str {
        "safetensors"
    }
}
