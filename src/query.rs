use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Integer, Nullable, Text, Timestamp, Unsigned, Varchar};

use crate::models::{
    Detection, FoodCategory, FoodInfoRow, HistoryEntry, NewPredictionIngredientRow,
    NewPredictionRow, NewUser, UserRow, UserUpdate,
};
use crate::schema::{
    food_categories, food_info, food_predictions, ingredients, prediction_ingredients, users,
};

no_arg_sql_function!(last_insert_id, Unsigned<BigInt>);

// MySQL has no RETURNING; read the id back on the same connection.
fn inserted_id(conn: &MysqlConnection) -> QueryResult<i32> {
    let id: u64 = diesel::select(last_insert_id).first(conn)?;
    row_id(id)
}

fn row_id(id: u64) -> QueryResult<i32> {
    i32::try_from(id).map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))
}

pub(crate) fn find_category_id(name: &str, conn: &MysqlConnection) -> QueryResult<Option<i32>> {
    food_categories::table
        .filter(food_categories::name.eq(name))
        .select(food_categories::id)
        .first(conn)
        .optional()
}

pub(crate) fn find_category(id: i32, conn: &MysqlConnection) -> QueryResult<Option<FoodCategory>> {
    food_categories::table.find(id).first(conn).optional()
}

pub(crate) fn find_all_categories(conn: &MysqlConnection) -> QueryResult<Vec<FoodCategory>> {
    food_categories::table
        .order(food_categories::id.asc())
        .load(conn)
}

pub(crate) fn find_food_info(
    category_id: i32,
    conn: &MysqlConnection,
) -> QueryResult<Option<FoodInfoRow>> {
    food_info::table
        .filter(food_info::food_category_id.eq(category_id))
        .first(conn)
        .optional()
}

pub(crate) fn find_ingredient_id(name: &str, conn: &MysqlConnection) -> QueryResult<Option<i32>> {
    ingredients::table
        .filter(ingredients::name.eq(name))
        .select(ingredients::id)
        .first(conn)
        .optional()
}

pub(crate) fn insert_prediction(row: &NewPredictionRow, conn: &MysqlConnection) -> QueryResult<i32> {
    diesel::insert_into(food_predictions::table)
        .values(row)
        .execute(conn)?;
    inserted_id(conn)
}

pub(crate) fn insert_prediction_ingredients(
    rows: &[NewPredictionIngredientRow],
    conn: &MysqlConnection,
) -> QueryResult<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    diesel::insert_into(prediction_ingredients::table)
        .values(rows)
        .execute(conn)
}

pub(crate) fn find_user_by_id(id: i32, conn: &MysqlConnection) -> QueryResult<Option<UserRow>> {
    users::table.find(id).first(conn).optional()
}

pub(crate) fn find_user_by_username(
    username: &str,
    conn: &MysqlConnection,
) -> QueryResult<Option<UserRow>> {
    users::table
        .filter(users::username.eq(username))
        .first(conn)
        .optional()
}

pub(crate) fn email_taken(email: &str, conn: &MysqlConnection) -> QueryResult<bool> {
    let count: i64 = users::table
        .filter(users::email.eq(email))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub(crate) fn insert_user(user: &NewUser, conn: &MysqlConnection) -> QueryResult<i32> {
    diesel::insert_into(users::table).values(user).execute(conn)?;
    inserted_id(conn)
}

pub(crate) fn update_user_profile(
    update: &UserUpdate,
    full_name: &str,
    conn: &MysqlConnection,
) -> QueryResult<usize> {
    diesel::update(users::table.find(update.id))
        .set((
            users::weight.eq(update.weight),
            users::height.eq(update.height),
            users::gender.eq(update.gender.as_deref()),
            users::activity_level.eq(update.activity_level.as_deref()),
            users::full_name.eq(full_name),
        ))
        .execute(conn)
}

// Grouped by prediction; every column outside `p` is aggregated so the
// statement is valid under ONLY_FULL_GROUP_BY.
const HISTORY_QUERY: &str = "
    SELECT
        p.id, p.user_id, p.food_category_id, p.confidence, p.image_path, p.created_at,
        MAX(f.name) AS food_name,
        MAX(f.description) AS food_description,
        MAX(fi.calories) AS calories,
        MAX(fi.protein) AS protein,
        MAX(fi.carbs) AS carbs,
        MAX(fi.fats) AS fats,
        GROUP_CONCAT(
            CONCAT(i.name, ':', pi.confidence)
            ORDER BY pi.confidence DESC
            SEPARATOR ','
        ) AS ingredients
    FROM food_predictions p
    LEFT JOIN food_categories f ON p.food_category_id = f.id
    LEFT JOIN food_info fi ON p.food_category_id = fi.food_category_id
    LEFT JOIN prediction_ingredients pi ON p.id = pi.prediction_id
    LEFT JOIN ingredients i ON pi.ingredient_id = i.id
    WHERE p.user_id = ?
    GROUP BY p.id
    ORDER BY p.created_at DESC, p.id DESC";

#[derive(Debug, QueryableByName)]
pub(crate) struct HistoryRow {
    #[sql_type = "Integer"]
    id: i32,
    #[sql_type = "Integer"]
    user_id: i32,
    #[sql_type = "Integer"]
    food_category_id: i32,
    #[sql_type = "Double"]
    confidence: f64,
    #[sql_type = "Varchar"]
    image_path: String,
    #[sql_type = "Timestamp"]
    created_at: NaiveDateTime,
    #[sql_type = "Nullable<Varchar>"]
    food_name: Option<String>,
    #[sql_type = "Nullable<Text>"]
    food_description: Option<String>,
    #[sql_type = "Nullable<Double>"]
    calories: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    protein: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    carbs: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    fats: Option<f64>,
    #[sql_type = "Nullable<Text>"]
    ingredients: Option<String>,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        HistoryEntry {
            id: row.id,
            user_id: row.user_id,
            food_category_id: row.food_category_id,
            confidence: row.confidence,
            image_path: row.image_path,
            created_at: row.created_at,
            food_name: row.food_name,
            food_description: row.food_description,
            calories: row.calories,
            protein: row.protein,
            carbs: row.carbs,
            fats: row.fats,
            ingredients: row
                .ingredients
                .as_deref()
                .map(parse_ingredient_list)
                .unwrap_or_default(),
        }
    }
}

pub(crate) fn prediction_history(
    user_id: i32,
    conn: &MysqlConnection,
) -> QueryResult<Vec<HistoryEntry>> {
    let rows: Vec<HistoryRow> = diesel::sql_query(HISTORY_QUERY)
        .bind::<Integer, _>(user_id)
        .load(conn)?;
    Ok(rows.into_iter().map(HistoryEntry::from).collect())
}

/// Parses `name:confidence,name:confidence` as produced by the history query.
/// Entries that do not parse are skipped.
pub fn parse_ingredient_list(concatenated: &str) -> Vec<Detection> {
    concatenated
        .split(',')
        .filter(|item| !item.trim().is_empty())
        .filter_map(|item| {
            let parsed = item
                .rsplit_once(':')
                .and_then(|(name, confidence)| {
                    confidence.trim().parse::<f64>().ok().map(|c| Detection::new(name.trim(), c))
                });
            if parsed.is_none() {
                log::warn!("Skipping malformed ingredient entry {item:?}");
            }
            parsed
        })
        .collect()
}
