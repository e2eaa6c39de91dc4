table! {
    users (id) {
        id -> Integer,
        username -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        full_name -> Varchar,
        weight -> Nullable<Double>,
        height -> Nullable<Double>,
        gender -> Nullable<Varchar>,
        activity_level -> Nullable<Varchar>,
        created_at -> Timestamp,
    }
}

table! {
    food_categories (id) {
        id -> Integer,
        name -> Varchar,
        description -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

table! {
    food_info (id) {
        id -> Integer,
        food_category_id -> Integer,
        calories -> Nullable<Double>,
        protein -> Nullable<Double>,
        carbs -> Nullable<Double>,
        fats -> Nullable<Double>,
        description -> Nullable<Text>,
        cultural_info -> Nullable<Text>,
    }
}

table! {
    ingredients (id) {
        id -> Integer,
        name -> Varchar,
    }
}

table! {
    food_predictions (id) {
        id -> Integer,
        user_id -> Integer,
        food_category_id -> Integer,
        confidence -> Double,
        image_path -> Varchar,
        created_at -> Timestamp,
    }
}

table! {
    prediction_ingredients (id) {
        id -> Integer,
        prediction_id -> Integer,
        ingredient_id -> Integer,
        confidence -> Double,
    }
}
