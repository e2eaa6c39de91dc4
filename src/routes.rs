use std::path::{Component, Path};

use actix_multipart::Multipart;
use actix_web::{
    get,
    http::header::CONTENT_TYPE,
    post, put, web, HttpRequest, HttpResponse,
};
use futures_util::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{hash_password, verify_password};
use crate::error::ApiError;
use crate::models::{ManualPrediction, NewUser, User, UserUpdate};
use crate::predict::{ImageUpload, PredictionRequest, Predictor};
use crate::store::FoodStore;

const JSON_LIMIT: usize = 16 * 1024 * 1024;

/// Registers every route plus the extractor error handlers that keep error
/// bodies in the `{"error": ...}` shape.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_LIMIT)
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| ApiError::NotFound(err.to_string()).into()),
    )
    .service(health)
    .service(predict_main_dish)
    .service(predict_side_dishes)
    .service(register)
    .service(login)
    .service(update_user)
    .service(user_predictions)
    .service(save_prediction)
    .service(food_categories)
    .service(food_category)
    .service(food_info)
    .service(temp_image);
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn parse_user_id(raw: &str) -> Result<i32, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::BadRequest("User ID is required".to_string()));
    }
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid user ID: {raw}")))
}

fn user_id_from_json(value: Option<&Value>) -> Result<i32, ApiError> {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid user ID: {n}"))),
        Some(Value::String(s)) => parse_user_id(s),
        _ => Err(ApiError::BadRequest("User ID is required".to_string())),
    }
}

// room for the data-URI header and the rest of the JSON object
const JSON_ENVELOPE_BYTES: usize = 4 * 1024;

/// Body limit for a JSON upload whose decoded image may be `image_limit` bytes.
fn json_body_limit(image_limit: usize) -> usize {
    image_limit.div_ceil(3) * 4 + JSON_ENVELOPE_BYTES
}

fn too_large(limit: usize) -> ApiError {
    ApiError::BadRequest(format!("Upload exceeds {limit} bytes"))
}

async fn read_multipart(mut multipart: Multipart, limit: usize) -> Result<PredictionRequest, ApiError> {
    let mut user_id = None;
    let mut file = None;

    while let Some(mut field) = multipart.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if data.len() + chunk.len() > limit {
                return Err(too_large(limit));
            }
            data.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "file" => {
                log::debug!("Received file field ({} bytes)", data.len());
                file = Some(data);
            }
            "user_id" => user_id = Some(String::from_utf8_lossy(&data).into_owned()),
            _ => {}
        }
    }

    let user_id = parse_user_id(user_id.as_deref().unwrap_or_default())?;
    match file {
        Some(bytes) if !bytes.is_empty() => Ok(PredictionRequest {
            user_id,
            image: ImageUpload::Bytes(bytes),
        }),
        _ => Err(ApiError::BadRequest("No image provided".to_string())),
    }
}

async fn read_json(mut payload: web::Payload, limit: usize) -> Result<PredictionRequest, ApiError> {
    let body_limit = json_body_limit(limit);
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if body.len() + chunk.len() > body_limit {
            return Err(too_large(limit));
        }
        body.extend_from_slice(&chunk);
    }

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
    let user_id = user_id_from_json(value.get("user_id"))?;
    match value.get("image").and_then(Value::as_str) {
        Some(image) if !image.trim().is_empty() => Ok(PredictionRequest {
            user_id,
            image: ImageUpload::Base64(image.to_string()),
        }),
        _ => Err(ApiError::BadRequest("No image provided".to_string())),
    }
}

/// Accepts a multipart upload (`file`, `user_id`) or JSON (`image`, `user_id`).
#[post("/predict")]
async fn predict_main_dish(
    req: HttpRequest,
    payload: web::Payload,
    predictor: web::Data<Predictor>,
    store: web::Data<dyn FoodStore>,
) -> Result<HttpResponse, ApiError> {
    let limit = predictor.max_upload_bytes();
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("multipart/form-data"));

    let request = if is_multipart {
        read_multipart(Multipart::new(req.headers(), payload), limit).await?
    } else {
        read_json(payload, limit).await?
    };

    let response = predictor.predict(store.into_inner(), request).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Debug, Deserialize)]
struct SideDishRequest {
    image: String,
}

#[post("/predict/side-dishes")]
async fn predict_side_dishes(
    predictor: web::Data<Predictor>,
    body: web::Json<SideDishRequest>,
) -> Result<HttpResponse, ApiError> {
    let response = predictor.side_dishes(body.into_inner().image).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    full_name: Option<String>,
    weight: Option<f64>,
    height: Option<f64>,
    gender: Option<String>,
    activity_level: Option<String>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[post("/api/register")]
async fn register(
    store: web::Data<dyn FoodStore>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let (Some(username), Some(email), Some(password), Some(full_name)) = (
        required(body.username),
        required(body.email),
        required(body.password),
        required(body.full_name),
    ) else {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    };

    let new_user = NewUser {
        username,
        email,
        password_hash: hash_password(&password),
        full_name,
        weight: body.weight,
        height: body.height,
        gender: body.gender,
        activity_level: body.activity_level,
    };
    let store = store.into_inner();
    let user = web::block(move || store.register_user(&new_user)).await??;
    log::info!("Registered user {} ({})", user.id, user.username);
    Ok(HttpResponse::Created().json(user))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[post("/api/login")]
async fn login(
    store: web::Data<dyn FoodStore>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let (Some(username), Some(password)) = (required(body.username), required(body.password)) else {
        return Err(ApiError::BadRequest("Missing username or password".to_string()));
    };

    let store = store.into_inner();
    let found = web::block(move || store.find_user(&username)).await??;
    match found {
        Some(row) if verify_password(&password, &row.password_hash) => {
            Ok(HttpResponse::Ok().json(User::from(row)))
        }
        _ => Err(ApiError::Unauthorized("Invalid username or password".to_string())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserRequest {
    id: Option<i32>,
    weight: Option<f64>,
    height: Option<f64>,
    gender: Option<String>,
    activity_level: Option<String>,
    full_name: Option<String>,
}

#[put("/api/users/update")]
async fn update_user(
    store: web::Data<dyn FoodStore>,
    body: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let id = body
        .id
        .ok_or_else(|| ApiError::BadRequest("User ID is required".to_string()))?;
    let update = UserUpdate {
        id,
        weight: body.weight,
        height: body.height,
        gender: body.gender,
        activity_level: body.activity_level,
        full_name: required(body.full_name),
    };
    let store = store.into_inner();
    let user = web::block(move || store.update_user(&update)).await??;
    Ok(HttpResponse::Ok().json(user))
}

#[get("/api/predictions/history/{user_id}")]
async fn user_predictions(
    user_id: web::Path<i32>,
    store: web::Data<dyn FoodStore>,
) -> Result<HttpResponse, ApiError> {
    let store = store.into_inner();
    let history = web::block(move || store.prediction_history(user_id.into_inner())).await??;
    Ok(HttpResponse::Ok().json(history))
}

#[post("/api/predictions")]
async fn save_prediction(
    store: web::Data<dyn FoodStore>,
    body: web::Json<ManualPrediction>,
) -> Result<HttpResponse, ApiError> {
    let prediction = body.into_inner();
    if !(0.0..=1.0).contains(&prediction.confidence) {
        return Err(ApiError::BadRequest(
            "confidence must be a probability between 0 and 1".to_string(),
        ));
    }
    let store = store.into_inner();
    let id = web::block(move || store.save_prediction(&prediction)).await??;
    Ok(HttpResponse::Ok().json(json!({
        "id": id,
        "message": "Prediction saved successfully",
    })))
}

#[get("/api/food-categories")]
async fn food_categories(store: web::Data<dyn FoodStore>) -> Result<HttpResponse, ApiError> {
    let store = store.into_inner();
    let categories = web::block(move || store.food_categories()).await??;
    Ok(HttpResponse::Ok().json(categories))
}

#[get("/api/food-categories/{category_id}")]
async fn food_category(
    category_id: web::Path<i32>,
    store: web::Data<dyn FoodStore>,
) -> Result<HttpResponse, ApiError> {
    let store = store.into_inner();
    let category = web::block(move || store.food_category(category_id.into_inner())).await??;
    Ok(HttpResponse::Ok().json(category))
}

#[get("/api/food-info/{category_id}")]
async fn food_info(
    category_id: web::Path<i32>,
    store: web::Data<dyn FoodStore>,
) -> Result<HttpResponse, ApiError> {
    let store = store.into_inner();
    let info = web::block(move || store.food_info(category_id.into_inner())).await??;
    Ok(HttpResponse::Ok().json(info))
}

/// True when `name` stays inside the directory it is joined to.
fn is_contained(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[get("/temp_image/{filename:.*}")]
async fn temp_image(
    filename: web::Path<String>,
    predictor: web::Data<Predictor>,
) -> Result<HttpResponse, ApiError> {
    let filename = filename.into_inner();
    let not_found = || ApiError::NotFound(format!("{filename} not found"));
    if !is_contained(&filename) {
        return Err(not_found());
    }

    let path = predictor.upload_dir().join(&filename);
    let content_type = mime_guess::from_path(&path).first_or_octet_stream().to_string();
    let bytes = web::block(move || std::fs::read(path))
        .await?
        .map_err(|_| not_found())?;
    Ok(HttpResponse::Ok().content_type(content_type).body(bytes))
}
