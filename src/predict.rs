//! Runs one prediction request end to end.
//!
//! preprocess -> classify main dish -> detect side dishes -> persist -> respond.
//! The first failing step decides the error response. Side-dish detection is
//! the exception: it degrades to an empty list and never blocks persistence.
//! Nothing is rolled back, an image stored before a later failure stays on disk.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use actix_web::web;
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::{
    classifier::MainDishClassifier,
    config::DEFAULT_MAX_UPLOAD_BYTES,
    error::{ApiError, ImageDecodeError},
    models::{as_percentage, to_percentage, Detection, NewPrediction},
    preprocess::{ImageTensor, PreparedImage},
    side_dish::{detections_from_score, LocalDetector, SideDishDetector, SIDE_DISH_LABEL},
    store::FoodStore,
};

#[derive(Debug, Clone)]
pub enum ImageUpload {
    /// Raw file bytes from a multipart upload.
    Bytes(Vec<u8>),
    /// Base64 string, optionally with a data-URI header.
    Base64(String),
}

impl ImageUpload {
    fn decode(&self) -> Result<PreparedImage, ImageDecodeError> {
        match self {
            ImageUpload::Bytes(bytes) => PreparedImage::from_bytes(bytes),
            ImageUpload::Base64(payload) => PreparedImage::from_base64(payload),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub user_id: i32,
    pub image: ImageUpload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResponse {
    pub class_name: String,
    #[serde(serialize_with = "as_percentage")]
    pub confidence: f64,
    pub ingredients: Vec<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fats: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideDishResponse {
    pub detected_sides: Vec<Detection>,
    /// Raw score per label, already in percent.
    pub all_predictions: BTreeMap<String, f64>,
}

#[derive(Clone)]
pub struct Predictor {
    classifier: MainDishClassifier,
    local: LocalDetector,
    side_dishes: SideDishDetector,
    upload_dir: PathBuf,
    max_upload_bytes: usize,
}

impl Predictor {
    pub fn new(
        classifier: MainDishClassifier,
        local: LocalDetector,
        side_dishes: SideDishDetector,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Predictor {
            classifier,
            local,
            side_dishes,
            upload_dir: upload_dir.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub async fn predict(
        &self,
        store: Arc<dyn FoodStore>,
        request: PredictionRequest,
    ) -> Result<PredictionResponse, ApiError> {
        let user_id = request.user_id;
        let timestamp = Utc::now().timestamp();
        let upload_dir = self.upload_dir.clone();

        let (stored, tensor) = web::block(move || -> Result<_, ImageDecodeError> {
            let image = request.image.decode()?;
            let (width, height) = image.dimensions();
            info!("Decoded upload for user {user_id}: {width}x{height}");
            let stored = image.persist(&upload_dir, user_id, timestamp)?;
            Ok((stored, image.to_tensor()))
        })
        .await??;
        let tensor = Arc::new(tensor);

        let classifier = self.classifier.clone();
        let input = Arc::clone(&tensor);
        let dish = web::block(move || classifier.classify(&input)).await??;

        let ingredients = self.detect_side_dishes(tensor, &stored.jpeg).await;

        let new_prediction = NewPrediction {
            user_id,
            category: dish.class_name.clone(),
            confidence: dish.confidence,
            image_path: stored.path_string(),
            ingredients: ingredients.clone(),
        };
        let recorded = web::block(move || store.record_prediction(&new_prediction)).await??;
        info!(
            "Stored prediction {} ({}) for user {user_id} with {} side dishes",
            recorded.id,
            dish.class_name,
            ingredients.len()
        );

        let nutrition = recorded.nutrition.unwrap_or_default();
        Ok(PredictionResponse {
            class_name: dish.class_name,
            confidence: dish.confidence,
            ingredients,
            calories: nutrition.calories,
            protein: nutrition.protein,
            carbs: nutrition.carbs,
            fats: nutrition.fats,
        })
    }

    async fn detect_side_dishes(&self, tensor: Arc<ImageTensor>, jpeg: &[u8]) -> Vec<Detection> {
        match &self.side_dishes {
            SideDishDetector::Local(detector) => {
                let detector = detector.clone();
                match web::block(move || detector.detect(&tensor)).await {
                    Ok(Ok(detections)) => detections,
                    Ok(Err(e)) => {
                        warn!("Local side dish detection failed: {e}");
                        Vec::new()
                    }
                    Err(e) => {
                        warn!("Local side dish detection failed: {e}");
                        Vec::new()
                    }
                }
            }
            SideDishDetector::Remote(detector) => detector.detect(jpeg).await,
        }
    }

    /// Local side-dish model only; nothing is stored.
    pub async fn side_dishes(&self, payload: String) -> Result<SideDishResponse, ApiError> {
        let local = self.local.clone();
        let confidence = web::block(move || -> Result<f32, ApiError> {
            let tensor = PreparedImage::from_base64(&payload)?.to_tensor();
            Ok(local.score(&tensor)?)
        })
        .await??;

        let mut all_predictions = BTreeMap::new();
        all_predictions.insert(SIDE_DISH_LABEL.to_string(), to_percentage(f64::from(confidence)));
        Ok(SideDishResponse {
            detected_sides: detections_from_score(confidence),
            all_predictions,
        })
    }
}
