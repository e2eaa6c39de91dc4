//! Food image classification service: classifies a dish photo, looks for side
//! dishes, and keeps a per-user history of predictions in MySQL.

#[macro_use]
extern crate diesel;

pub mod auth;
pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod onnx;
pub mod predict;
pub mod preprocess;
pub mod query;
pub mod routes;
pub mod schema;
pub mod side_dish;
pub mod store;
