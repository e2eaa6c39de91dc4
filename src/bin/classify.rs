//! Classifies one local photo with the bundled models, without the server or
//! the database. Prints the score of every dish and the best guess.
//!
//! ```bash
//! classify test_image/laksa.jpeg
//! classify --side-dish-model nasi_lemak_side_dishes_model.onnx test_image/nasi_lemak.jpeg
//! ```

use std::{error::Error, fs, path::PathBuf, process, sync::Arc};

use clap::Parser;
use food_classifier::{
    classifier::{DishPrediction, MainDishClassifier, MAIN_LABELS},
    models::to_percentage,
    onnx::OnnxModel,
    preprocess::PreparedImage,
    side_dish::{is_present, LocalDetector, SIDE_DISH_LABEL},
};

#[derive(Parser)]
#[command(name = "classify")]
#[command(about = "Classify a food photo with the local models", long_about = None)]
struct Cli {
    /// Photo to classify
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    #[arg(long, env = "MAIN_MODEL_PATH", default_value = "food_classification_model.onnx")]
    main_model: PathBuf,

    /// Also check for ikan bilis with this side-dish model
    #[arg(long, env = "SIDE_DISH_MODEL_PATH")]
    side_dish_model: Option<PathBuf>,
}

fn main_dish_report(prediction: &DishPrediction) -> Vec<String> {
    let mut lines: Vec<String> = MAIN_LABELS
        .iter()
        .zip(&prediction.probabilities)
        .map(|(label, p)| format!("{label}: {:.2}%", to_percentage(f64::from(*p))))
        .collect();
    lines.push(format!(
        "Predicted food: {} with {:.2}% confidence",
        prediction.class_name,
        to_percentage(prediction.confidence)
    ));
    lines
}

fn side_dish_report(confidence: f32) -> String {
    let percent = to_percentage(f64::from(confidence));
    if is_present(confidence) {
        format!("Detected {SIDE_DISH_LABEL} with {percent:.2}% confidence")
    } else {
        format!("{SIDE_DISH_LABEL} not detected (confidence: {percent:.2}%)")
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(&cli.image)
        .map_err(|e| format!("cannot read {}: {e}", cli.image.display()))?;
    let tensor = PreparedImage::from_bytes(&bytes)?.to_tensor();

    let classifier = MainDishClassifier::new(Arc::new(OnnxModel::load(&cli.main_model)?));
    let prediction = classifier.classify(&tensor)?;
    for line in main_dish_report(&prediction) {
        println!("{line}");
    }

    if let Some(path) = &cli.side_dish_model {
        let detector = LocalDetector::new(Arc::new(OnnxModel::load(path)?));
        println!("{}", side_dish_report(detector.score(&tensor)?));
    }
    Ok(())
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));
    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_every_dish_then_the_best_guess() {
        let prediction = DishPrediction {
            class_name: "laksa".to_string(),
            confidence: 0.7,
            probabilities: vec![0.05, 0.05, 0.7, 0.1, 0.1],
        };
        let lines = main_dish_report(&prediction);
        assert_eq!(lines.len(), MAIN_LABELS.len() + 1);
        assert_eq!(lines[0], "Cendol: 5.00%");
        assert_eq!(lines[2], "Laksa: 70.00%");
        assert_eq!(lines[5], "Predicted food: laksa with 70.00% confidence");
    }

    #[test]
    fn side_dish_report_uses_the_presence_threshold() {
        assert_eq!(side_dish_report(0.85), "Detected Ikan Bilis with 85.00% confidence");
        assert_eq!(side_dish_report(0.3), "Ikan Bilis not detected (confidence: 30.00%)");
    }

    #[test]
    fn cli_requires_an_image() {
        let cli = Cli::try_parse_from(["classify", "photo.jpg"]).unwrap();
        assert_eq!(cli.image, PathBuf::from("photo.jpg"));
        assert!(Cli::try_parse_from(["classify"]).is_err());
    }
}
