//! Model capability and ONNX backend
//!
//! The pipeline sees a model only through [`SeparationModel::infer`]: a
//! normalized magnitude batch `(batch, channels, bins, frames)` in, a tensor
//! of the same shape out. [`OnnxModel`] runs exported networks with tract
//! (pure Rust, CPU).

use std::path::Path;

use ndarray::{Array4, ArrayD, Ix4};

use crate::error::{SpectralError, SpectralResult};

/// Read-only inference capability
pub trait SeparationModel {
    /// Predict a normalized vocal magnitude from a normalized mixture magnitude
    fn infer(&self, input: &Array4<f32>) -> SpectralResult<Array4<f32>>;

    /// Model name/version
    fn name(&self) -> &str;
}

impl<M: SeparationModel + ?Sized> SeparationModel for Box<M> {
    fn infer(&self, input: &Array4<f32>) -> SpectralResult<Array4<f32>> {
        (**self).infer(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Tract runnable plan
type TractPlan = tract_onnx::prelude::SimplePlan<
    tract_onnx::prelude::TypedFact,
    Box<dyn tract_onnx::prelude::TypedOp>,
    tract_onnx::prelude::Graph<tract_onnx::prelude::TypedFact, Box<dyn tract_onnx::prelude::TypedOp>>,
>;

/// ONNX model executed with tract
pub struct OnnxModel {
    plan: TractPlan,
    name: String,
}

impl OnnxModel {
    /// Load and optimize an ONNX model
    pub fn load<P: AsRef<Path>>(model_path: P) -> SpectralResult<Self> {
        use tract_onnx::prelude::*;

        let path = model_path.as_ref();
        if !path.exists() {
            return Err(SpectralError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| SpectralError::Tract(e.to_string()))?
            .into_optimized()
            .map_err(|e| SpectralError::Tract(e.to_string()))?
            .into_runnable()
            .map_err(|e| SpectralError::Tract(e.to_string()))?;

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
            .to_string();

        log::info!("Loaded ONNX model {} from {}", name, path.display());

        Ok(Self { plan, name })
    }

    fn run(&self, input: &Array4<f32>) -> SpectralResult<ArrayD<f32>> {
        use tract_onnx::prelude::*;

        let tensor: Tensor = input.clone().into_dyn().into();
        let inputs: TVec<TValue> = std::iter::once(tensor.into()).collect();
        let outputs = self
            .plan
            .run(inputs)
            .map_err(|e| SpectralError::Tract(e.to_string()))?;

        let first = outputs.first().ok_or_else(|| {
            SpectralError::Model("model produced no outputs".into())
        })?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| SpectralError::Tract(e.to_string()))?;

        Ok(view.to_owned())
    }
}

impl SeparationModel for OnnxModel {
    fn infer(&self, input: &Array4<f32>) -> SpectralResult<Array4<f32>> {
        let output = self.run(input)?;
        let shape = output.shape().to_vec();
        output
            .into_dimensionality::<Ix4>()
            .map_err(|_| SpectralError::ModelShapeMismatch {
                expected: "4D tensor [batch, channels, bins, frames]".into(),
                got: format!("{}D tensor {:?}", shape.len(), shape),
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Model that returns its input unchanged
#[derive(Debug, Clone, Default)]
pub struct IdentityModel;

impl SeparationModel for IdentityModel {
    fn infer(&self, input: &Array4<f32>) -> SpectralResult<Array4<f32>> {
        Ok(input.clone())
    }

    fn name(&self) -> &str {
        "identity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model() {
        match OnnxModel::load("does/not/exist.onnx") {
            Err(SpectralError::ModelNotFound { path }) => assert!(path.ends_with("exist.onnx")),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("model should not load"),
        }
    }

    #[test]
    fn test_identity_through_box() {
        let model: Box<dyn SeparationModel> = Box::new(IdentityModel);
        let x = Array4::from_elem((1, 1, 3, 2), 0.5f32);
        assert_eq!(model.infer(&x).unwrap(), x);
        assert_eq!(model.name(), "identity");
    }
}
