use std::io;
use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};

use food_classifier::classifier::MainDishClassifier;
use food_classifier::config::{Config, DetectorKind};
use food_classifier::onnx::OnnxModel;
use food_classifier::predict::Predictor;
use food_classifier::routes;
use food_classifier::side_dish::{LocalDetector, RemoteDetector, SideDishDetector};
use food_classifier::store::{FoodStore, MysqlStore};

fn startup_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(startup_error)?;

    log::info!("loading models");
    let main_model = Arc::new(OnnxModel::load(&config.main_model_path).map_err(startup_error)?);
    let side_model = Arc::new(OnnxModel::load(&config.side_dish_model_path).map_err(startup_error)?);
    let classifier = MainDishClassifier::new(main_model);
    let local = LocalDetector::new(side_model);

    let side_dishes = match (config.detector, &config.remote) {
        (DetectorKind::Remote, Some(remote)) => {
            log::info!("side dishes detected by {}/{}/{}", remote.base_url, remote.model_id, remote.version);
            SideDishDetector::Remote(Arc::new(RemoteDetector::new(remote).map_err(startup_error)?))
        }
        _ => {
            log::info!("side dishes detected by the local model");
            SideDishDetector::Local(local.clone())
        }
    };
    let predictor = web::Data::new(
        Predictor::new(classifier, local, side_dishes, config.upload_dir.clone())
            .with_upload_limit(config.max_upload_bytes),
    );

    // set up database connection pool
    let store: Arc<dyn FoodStore> = Arc::new(
        MysqlStore::connect(&config.database_url, config.pool_max_size).map_err(startup_error)?,
    );
    let store = web::Data::from(store);

    log::info!("starting HTTP server at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        App::new()
            .app_data(store.clone())
            .app_data(predictor.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
