//! ONNX Runtime backed model shared by both classifiers.

use std::{path::Path, sync::Mutex};

use ort::{
    logging::LogLevel,
    session::Session,
    value::TensorRef,
};

use crate::{
    classifier::MainDishModel, error::ModelError, preprocess::ImageTensor, side_dish::SideDishModel,
};

pub struct OnnxModel {
    name: String,
    // running a session needs `&mut`
    session: Mutex<Session>,
}

impl OnnxModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let load_error = |source: ort::Error| ModelError::Load {
            path: path.display().to_string(),
            source,
        };
        let builder = Session::builder()
            .map_err(|e| load_error(e.into()))?
            .with_log_level(LogLevel::Error)
            .map_err(|e| load_error(e.into()))?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| load_error(e.into()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        log::info!("Loaded model {name} from {}", path.display());
        Ok(OnnxModel {
            name,
            session: Mutex::new(session),
        })
    }

    /// Single forward pass, returns the first output flattened.
    pub fn run(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        let tensor = TensorRef::from_array_view(input.view())?;
        let mut session = self.session.lock().map_err(|_| ModelError::Poisoned)?;
        let outputs = session.run(ort::inputs![tensor])?;
        let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}

impl MainDishModel for OnnxModel {
    fn probabilities(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        self.run(input)
    }
}

impl SideDishModel for OnnxModel {
    fn presence(&self, input: &ImageTensor) -> Result<f32, ModelError> {
        let output = self.run(input)?;
        output.first().copied().ok_or_else(|| {
            ModelError::UnexpectedOutput(format!("{} produced an empty output", self.name))
        })
    }
}
