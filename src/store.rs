//! Persistence seam between the handlers and MySQL.
//!
//! Every `FoodStore` method is the complete database work of one request. The
//! MySQL implementation checks out a single pooled connection per call and runs
//! plain statements on it, without a transaction: if the process dies between
//! the prediction insert and the ingredient inserts the prediction is kept
//! without ingredients.

use chrono::Utc;
use diesel::mysql::MysqlConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::error::StoreError;
use crate::models::{
    FoodCategory, FoodInfo, HistoryEntry, ManualPrediction, NewPrediction,
    NewPredictionIngredientRow, NewPredictionRow, NewUser, Nutrition, RecordedPrediction, User,
    UserRow, UserUpdate,
};
use crate::query;

pub type DbPool = r2d2::Pool<ConnectionManager<MysqlConnection>>;

pub trait FoodStore: Send + Sync {
    /// Stores a classifier result with its side dishes and returns the
    /// category's nutrition facts. Fails with `NotFound` and stores nothing
    /// when the category label is unknown. Unknown side dishes are skipped.
    fn record_prediction(&self, prediction: &NewPrediction) -> Result<RecordedPrediction, StoreError>;

    fn save_prediction(&self, prediction: &ManualPrediction) -> Result<i32, StoreError>;

    fn prediction_history(&self, user_id: i32) -> Result<Vec<HistoryEntry>, StoreError>;

    fn food_categories(&self) -> Result<Vec<FoodCategory>, StoreError>;

    fn food_category(&self, id: i32) -> Result<FoodCategory, StoreError>;

    fn food_info(&self, category_id: i32) -> Result<FoodInfo, StoreError>;

    /// Fails with `Conflict` and inserts nothing when the username or email is taken.
    fn register_user(&self, user: &NewUser) -> Result<User, StoreError>;

    fn find_user(&self, username: &str) -> Result<Option<UserRow>, StoreError>;

    fn update_user(&self, update: &UserUpdate) -> Result<User, StoreError>;
}

/// Maps a unique-key violation on `users` to the field that is taken.
/// MySQL names the key after its column, e.g. `for key 'users.email'`.
fn registration_error(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            let key = info.constraint_name().unwrap_or_else(|| info.message());
            if key.contains("email") {
                StoreError::Conflict("Email")
            } else {
                StoreError::Conflict("Username")
            }
        }
        other => StoreError::Database(other),
    }
}

pub struct MysqlStore {
    pool: DbPool,
}

impl MysqlStore {
    pub fn new(pool: DbPool) -> Self {
        MysqlStore { pool }
    }

    pub fn connect(database_url: &str, max_size: u32) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<MysqlConnection>::new(database_url);
        let pool = r2d2::Pool::builder().max_size(max_size).build(manager)?;
        Ok(MysqlStore::new(pool))
    }
}

impl FoodStore for MysqlStore {
    fn record_prediction(&self, prediction: &NewPrediction) -> Result<RecordedPrediction, StoreError> {
        let conn = self.pool.get()?;

        let category_id = query::find_category_id(&prediction.category, &conn)?
            .ok_or(StoreError::NotFound("Food category"))?;

        let prediction_id = query::insert_prediction(
            &NewPredictionRow {
                user_id: prediction.user_id,
                food_category_id: category_id,
                confidence: prediction.confidence,
                image_path: &prediction.image_path,
                created_at: Utc::now().naive_utc(),
            },
            &conn,
        )?;

        let mut rows = Vec::with_capacity(prediction.ingredients.len());
        for ingredient in &prediction.ingredients {
            match query::find_ingredient_id(&ingredient.name, &conn)? {
                Some(ingredient_id) => rows.push(NewPredictionIngredientRow {
                    prediction_id,
                    ingredient_id,
                    confidence: ingredient.confidence,
                }),
                None => log::warn!("Unknown ingredient {:?}, not recorded", ingredient.name),
            }
        }
        query::insert_prediction_ingredients(&rows, &conn)?;

        let nutrition = query::find_food_info(category_id, &conn)?.as_ref().map(Nutrition::from);
        Ok(RecordedPrediction {
            id: prediction_id,
            category_id,
            nutrition,
        })
    }

    fn save_prediction(&self, prediction: &ManualPrediction) -> Result<i32, StoreError> {
        let conn = self.pool.get()?;
        if query::find_category(prediction.food_id, &conn)?.is_none() {
            return Err(StoreError::NotFound("Food category"));
        }
        let id = query::insert_prediction(
            &NewPredictionRow {
                user_id: prediction.user_id,
                food_category_id: prediction.food_id,
                confidence: prediction.confidence,
                image_path: &prediction.image_path,
                created_at: Utc::now().naive_utc(),
            },
            &conn,
        )?;
        Ok(id)
    }

    fn prediction_history(&self, user_id: i32) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.pool.get()?;
        Ok(query::prediction_history(user_id, &conn)?)
    }

    fn food_categories(&self) -> Result<Vec<FoodCategory>, StoreError> {
        let conn = self.pool.get()?;
        Ok(query::find_all_categories(&conn)?)
    }

    fn food_category(&self, id: i32) -> Result<FoodCategory, StoreError> {
        let conn = self.pool.get()?;
        query::find_category(id, &conn)?.ok_or(StoreError::NotFound("Category"))
    }

    fn food_info(&self, category_id: i32) -> Result<FoodInfo, StoreError> {
        let conn = self.pool.get()?;
        let category =
            query::find_category(category_id, &conn)?.ok_or(StoreError::NotFound("Food information"))?;
        let info = query::find_food_info(category_id, &conn)?;
        Ok(FoodInfo::new(category, info))
    }

    fn register_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let conn = self.pool.get()?;
        if query::find_user_by_username(&user.username, &conn)?.is_some() {
            return Err(StoreError::Conflict("Username"));
        }
        if query::email_taken(&user.email, &conn)? {
            return Err(StoreError::Conflict("Email"));
        }
        // a concurrent registration can still win the race to the unique keys
        let id = query::insert_user(user, &conn).map_err(registration_error)?;
        Ok(User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            weight: user.weight,
            height: user.height,
            gender: user.gender.clone(),
            activity_level: user.activity_level.clone(),
        })
    }

    fn find_user(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        let conn = self.pool.get()?;
        Ok(query::find_user_by_username(username, &conn)?)
    }

    fn update_user(&self, update: &UserUpdate) -> Result<User, StoreError> {
        let conn = self.pool.get()?;
        let existing = query::find_user_by_id(update.id, &conn)?.ok_or(StoreError::NotFound("User"))?;
        let full_name = update.full_name.as_deref().unwrap_or(&existing.full_name);
        query::update_user_profile(update, full_name, &conn)?;
        let updated = query::find_user_by_id(update.id, &conn)?.ok_or(StoreError::NotFound("User"))?;
        Ok(User::from(updated))
    }
}
