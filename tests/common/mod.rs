#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use actix_web::web;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDateTime;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use food_classifier::classifier::{MainDishClassifier, MainDishModel};
use food_classifier::error::{ModelError, StoreError};
use food_classifier::models::{
    Detection, FoodCategory, FoodInfo, FoodInfoRow, HistoryEntry, ManualPrediction, NewPrediction,
    NewUser, Nutrition, RecordedPrediction, User, UserRow, UserUpdate,
};
use food_classifier::predict::Predictor;
use food_classifier::preprocess::ImageTensor;
use food_classifier::side_dish::{LocalDetector, SideDishDetector, SideDishModel};
use food_classifier::store::FoodStore;

#[derive(Debug, Clone)]
pub struct StoredPrediction {
    pub id: i32,
    pub user_id: i32,
    pub food_category_id: i32,
    pub confidence: f64,
    pub image_path: String,
    pub ingredients: Vec<Detection>,
}

#[derive(Default)]
struct State {
    users: Vec<UserRow>,
    categories: Vec<FoodCategory>,
    food_info: Vec<FoodInfoRow>,
    ingredients: Vec<String>,
    predictions: Vec<StoredPrediction>,
}

/// `FoodStore` over plain vectors, mirroring the lookup-before-insert rules
/// of the MySQL store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn epoch() -> NaiveDateTime {
    chrono::DateTime::from_timestamp(1_700_000_000, 0)
        .unwrap()
        .naive_utc()
}

impl MemoryStore {
    /// Categories and ingredients as created by the migrations.
    pub fn seeded() -> Self {
        let store = MemoryStore::default();
        {
            let mut state = store.state.lock().unwrap();
            for (i, name) in ["cendol", "ketupat", "laksa", "nasi ayam", "nasi lemak"]
                .iter()
                .enumerate()
            {
                state.categories.push(FoodCategory {
                    id: i as i32 + 1,
                    name: name.to_string(),
                    description: Some(format!("{name} description")),
                    created_at: epoch(),
                });
            }
            state.food_info.push(FoodInfoRow {
                id: 1,
                food_category_id: 5,
                calories: Some(644.0),
                protein: Some(18.5),
                carbs: Some(80.2),
                fats: Some(28.0),
                description: Some("per plate".to_string()),
                cultural_info: Some("national dish".to_string()),
            });
            state.ingredients = ["Ikan Bilis", "Telur", "Sambal", "Timun", "Kacang"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        store
    }

    pub fn without_category(name: &str) -> Self {
        let store = MemoryStore::seeded();
        store
            .state
            .lock()
            .unwrap()
            .categories
            .retain(|c| c.name != name);
        store
    }

    pub fn predictions(&self) -> Vec<StoredPrediction> {
        self.state.lock().unwrap().predictions.clone()
    }

    pub fn user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }
}

impl FoodStore for MemoryStore {
    fn record_prediction(&self, prediction: &NewPrediction) -> Result<RecordedPrediction, StoreError> {
        let mut state = self.state.lock().unwrap();
        let category_id = state
            .categories
            .iter()
            .find(|c| c.name == prediction.category)
            .map(|c| c.id)
            .ok_or(StoreError::NotFound("Food category"))?;
        let known: Vec<Detection> = prediction
            .ingredients
            .iter()
            .filter(|d| state.ingredients.contains(&d.name))
            .cloned()
            .collect();
        let id = state.predictions.len() as i32 + 1;
        state.predictions.push(StoredPrediction {
            id,
            user_id: prediction.user_id,
            food_category_id: category_id,
            confidence: prediction.confidence,
            image_path: prediction.image_path.clone(),
            ingredients: known,
        });
        let nutrition = state
            .food_info
            .iter()
            .find(|i| i.food_category_id == category_id)
            .map(Nutrition::from);
        Ok(RecordedPrediction {
            id,
            category_id,
            nutrition,
        })
    }

    fn save_prediction(&self, prediction: &ManualPrediction) -> Result<i32, StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.categories.iter().any(|c| c.id == prediction.food_id) {
            return Err(StoreError::NotFound("Food category"));
        }
        let id = state.predictions.len() as i32 + 1;
        state.predictions.push(StoredPrediction {
            id,
            user_id: prediction.user_id,
            food_category_id: prediction.food_id,
            confidence: prediction.confidence,
            image_path: prediction.image_path.clone(),
            ingredients: Vec::new(),
        });
        Ok(id)
    }

    fn prediction_history(&self, user_id: i32) -> Result<Vec<HistoryEntry>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut history: Vec<HistoryEntry> = state
            .predictions
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| {
                let category = state.categories.iter().find(|c| c.id == p.food_category_id);
                let nutrition = state
                    .food_info
                    .iter()
                    .find(|i| i.food_category_id == p.food_category_id)
                    .map(Nutrition::from)
                    .unwrap_or_default();
                let mut ingredients = p.ingredients.clone();
                ingredients.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                HistoryEntry {
                    id: p.id,
                    user_id: p.user_id,
                    food_category_id: p.food_category_id,
                    confidence: p.confidence,
                    image_path: p.image_path.clone(),
                    created_at: epoch(),
                    food_name: category.map(|c| c.name.clone()),
                    food_description: category.and_then(|c| c.description.clone()),
                    calories: nutrition.calories,
                    protein: nutrition.protein,
                    carbs: nutrition.carbs,
                    fats: nutrition.fats,
                    ingredients,
                }
            })
            .collect();
        history.reverse();
        Ok(history)
    }

    fn food_categories(&self) -> Result<Vec<FoodCategory>, StoreError> {
        Ok(self.state.lock().unwrap().categories.clone())
    }

    fn food_category(&self, id: i32) -> Result<FoodCategory, StoreError> {
        self.state
            .lock()
            .unwrap()
            .categories
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("Category"))
    }

    fn food_info(&self, category_id: i32) -> Result<FoodInfo, StoreError> {
        let state = self.state.lock().unwrap();
        let category = state
            .categories
            .iter()
            .find(|c| c.id == category_id)
            .cloned()
            .ok_or(StoreError::NotFound("Food information"))?;
        let info = state
            .food_info
            .iter()
            .find(|i| i.food_category_id == category_id)
            .cloned();
        Ok(FoodInfo::new(category, info))
    }

    fn register_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("Username"));
        }
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("Email"));
        }
        let row = UserRow {
            id: state.users.len() as i32 + 1,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            full_name: user.full_name.clone(),
            weight: user.weight,
            height: user.height,
            gender: user.gender.clone(),
            activity_level: user.activity_level.clone(),
            created_at: epoch(),
        };
        state.users.push(row.clone());
        Ok(User::from(row))
    }

    fn find_user(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    fn update_user(&self, update: &UserUpdate) -> Result<User, StoreError> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == update.id)
            .ok_or(StoreError::NotFound("User"))?;
        user.weight = update.weight;
        user.height = update.height;
        user.gender = update.gender.clone();
        user.activity_level = update.activity_level.clone();
        if let Some(full_name) = &update.full_name {
            user.full_name = full_name.clone();
        }
        Ok(User::from(user.clone()))
    }
}

/// Main-dish model that always returns the same scores.
pub struct FixedScores(pub Vec<f32>);

impl MainDishModel for FixedScores {
    fn probabilities(&self, _input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        Ok(self.0.clone())
    }
}

/// Side-dish model that always returns the same probability.
pub struct FixedPresence(pub f32);

impl SideDishModel for FixedPresence {
    fn presence(&self, _input: &ImageTensor) -> Result<f32, ModelError> {
        Ok(self.0)
    }
}

/// Scores that pick "nasi lemak" at 0.8.
pub fn nasi_lemak_scores() -> Vec<f32> {
    vec![0.05, 0.05, 0.05, 0.05, 0.8]
}

pub fn predictor(upload_dir: &Path, scores: Vec<f32>, side_dish: f32) -> web::Data<Predictor> {
    let classifier = MainDishClassifier::new(Arc::new(FixedScores(scores)));
    let local = LocalDetector::new(Arc::new(FixedPresence(side_dish)));
    web::Data::new(Predictor::new(
        classifier,
        local.clone(),
        SideDishDetector::Local(local),
        upload_dir,
    ))
}

pub fn predictor_with_limit(upload_dir: &Path, max_upload_bytes: usize) -> web::Data<Predictor> {
    let predictor = predictor(upload_dir, nasi_lemak_scores(), 0.9);
    web::Data::new(predictor.get_ref().clone().with_upload_limit(max_upload_bytes))
}

pub fn store_data(store: &Arc<MemoryStore>) -> web::Data<dyn FoodStore> {
    let store: Arc<dyn FoodStore> = store.clone();
    web::Data::from(store)
}

pub fn sample_png() -> Vec<u8> {
    let img = RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 8) as u8, (y * 10) as u8, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

pub fn sample_data_uri() -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(sample_png()))
}
