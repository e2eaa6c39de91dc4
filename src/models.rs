use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, Serializer};

use crate::schema::{food_predictions, prediction_ingredients, users};

/// Converts a probability in [0,1] to a percentage rounded to two decimals.
pub fn to_percentage(probability: f64) -> f64 {
    (probability * 100.0 * 100.0).round() / 100.0
}

/// Serializes a stored probability as a percentage. Confidences only become
/// percentages when they leave the process as JSON.
pub fn as_percentage<S: Serializer>(probability: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(to_percentage(*probability))
}

#[derive(Debug, Clone, Queryable)]
pub struct UserRow {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub gender: Option<String>,
    pub activity_level: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "users"]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub gender: Option<String>,
    pub activity_level: Option<String>,
}

/// Profile fields a user may change after registration.
#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub id: i32,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub gender: Option<String>,
    pub activity_level: Option<String>,
    pub full_name: Option<String>,
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub gender: Option<String>,
    pub activity_level: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            full_name: row.full_name,
            weight: row.weight,
            height: row.height,
            gender: row.gender,
            activity_level: row.activity_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable)]
pub struct FoodCategory {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable)]
pub struct FoodInfoRow {
    pub id: i32,
    pub food_category_id: i32,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    pub description: Option<String>,
    pub cultural_info: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Nutrition {
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
}

impl From<&FoodInfoRow> for Nutrition {
    fn from(row: &FoodInfoRow) -> Self {
        Nutrition {
            calories: row.calories,
            protein: row.protein,
            carbs: row.carbs,
            fats: row.fats,
        }
    }
}

/// A category together with its nutrition and cultural notes, if recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodInfo {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    pub nutritional_info: Option<String>,
    pub cultural_info: Option<String>,
}

impl FoodInfo {
    pub fn new(category: FoodCategory, info: Option<FoodInfoRow>) -> Self {
        let info = info.as_ref();
        FoodInfo {
            id: category.id,
            name: category.name,
            description: category.description,
            calories: info.and_then(|i| i.calories),
            protein: info.and_then(|i| i.protein),
            carbs: info.and_then(|i| i.carbs),
            fats: info.and_then(|i| i.fats),
            nutritional_info: info.and_then(|i| i.description.clone()),
            cultural_info: info.and_then(|i| i.cultural_info.clone()),
        }
    }
}

/// A named side dish with the probability that it is on the plate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub name: String,
    #[serde(serialize_with = "as_percentage")]
    pub confidence: f64,
}

impl Detection {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Detection {
            name: name.into(),
            confidence,
        }
    }
}

/// Everything persisted for one classifier invocation.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub user_id: i32,
    pub category: String,
    pub confidence: f64,
    pub image_path: String,
    pub ingredients: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPrediction {
    pub id: i32,
    pub category_id: i32,
    pub nutrition: Option<Nutrition>,
}

/// Body of `POST /api/predictions`, a prediction computed elsewhere.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualPrediction {
    pub user_id: i32,
    pub food_id: i32,
    pub confidence: f64,
    pub image_path: String,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "food_predictions"]
pub struct NewPredictionRow<'a> {
    pub user_id: i32,
    pub food_category_id: i32,
    pub confidence: f64,
    pub image_path: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "prediction_ingredients"]
pub struct NewPredictionIngredientRow {
    pub prediction_id: i32,
    pub ingredient_id: i32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i32,
    pub user_id: i32,
    pub food_category_id: i32,
    #[serde(serialize_with = "as_percentage")]
    pub confidence: f64,
    pub image_path: String,
    pub created_at: NaiveDateTime,
    pub food_name: Option<String>,
    pub food_description: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    pub ingredients: Vec<Detection>,
}
