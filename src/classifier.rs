use std::sync::Arc;

use crate::{error::ModelError, preprocess::ImageTensor};

/// Dish labels in the order the model emits them.
pub const MAIN_LABELS: [&str; 5] = ["Cendol", "Ketupat", "Laksa", "Nasi Ayam", "Nasi Lemak"];

const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// Raw forward pass of the main-dish model.
pub trait MainDishModel: Send + Sync {
    fn probabilities(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DishPrediction {
    /// Lower-cased label, matching `food_categories.name`.
    pub class_name: String,
    pub confidence: f64,
    pub probabilities: Vec<f32>,
}

#[derive(Clone)]
pub struct MainDishClassifier {
    model: Arc<dyn MainDishModel>,
}

impl MainDishClassifier {
    pub fn new(model: Arc<dyn MainDishModel>) -> Self {
        MainDishClassifier { model }
    }

    /// Always returns the best guess, however low its confidence.
    pub fn classify(&self, input: &ImageTensor) -> Result<DishPrediction, ModelError> {
        let raw = self.model.probabilities(input)?;
        if raw.len() != MAIN_LABELS.len() {
            return Err(ModelError::UnexpectedOutput(format!(
                "expected {} class scores, got {}",
                MAIN_LABELS.len(),
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::UnexpectedOutput("non-finite class score".to_string()));
        }

        let probabilities = to_distribution(raw);
        let (index, confidence) = argmax(&probabilities);
        let class_name = MAIN_LABELS[index].to_lowercase();
        log::info!(
            "Main dish prediction: {class_name} with confidence {:.2}%",
            confidence * 100.0
        );
        Ok(DishPrediction {
            class_name,
            confidence: f64::from(confidence),
            probabilities,
        })
    }
}

/// Keeps a model output that is already a distribution, otherwise applies softmax.
pub fn to_distribution(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let in_range = scores.iter().all(|v| (0.0..=1.0).contains(v));
    if in_range && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
        return scores;
    }
    softmax(&scores)
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}

/// First index wins on ties.
fn argmax(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use rstest::rstest;

    struct Fixed(Vec<f32>);

    impl MainDishModel for Fixed {
        fn probabilities(&self, _input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
            Ok(self.0.clone())
        }
    }

    fn classify(scores: Vec<f32>) -> Result<DishPrediction, ModelError> {
        let classifier = MainDishClassifier::new(Arc::new(Fixed(scores)));
        classifier.classify(&Array4::zeros((1, 224, 224, 3)))
    }

    #[test]
    fn picks_the_most_likely_label_lower_cased() {
        let prediction = classify(vec![0.05, 0.05, 0.1, 0.1, 0.7]).unwrap();
        assert_eq!(prediction.class_name, "nasi lemak");
        assert!((prediction.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn low_confidence_still_returns_a_guess() {
        let prediction = classify(vec![0.2, 0.21, 0.19, 0.2, 0.2]).unwrap();
        assert_eq!(prediction.class_name, "ketupat");
    }

    #[rstest]
    #[case(vec![0.1, 0.2, 0.3, 0.2, 0.2])]
    #[case(vec![2.0, -1.0, 0.5, 3.5, 0.0])]
    #[case(vec![0.0, 0.0, 0.0, 0.0, 0.0])]
    #[case(vec![90.0, 10.0, 0.0, 0.0, 0.0])]
    fn probabilities_sum_to_one(#[case] scores: Vec<f32>) {
        let prediction = classify(scores).unwrap();
        let sum: f32 = prediction.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum was {sum}");
        assert!(prediction.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn logits_keep_their_ordering() {
        let prediction = classify(vec![2.0, -1.0, 0.5, 3.5, 0.0]).unwrap();
        assert_eq!(prediction.class_name, "nasi ayam");
    }

    #[test]
    fn wrong_number_of_scores_is_rejected() {
        let err = classify(vec![0.5, 0.5]).unwrap_err();
        assert!(matches!(err, ModelError::UnexpectedOutput(_)));
    }

    #[test]
    fn nan_scores_are_rejected() {
        let err = classify(vec![f32::NAN, 0.1, 0.1, 0.1, 0.1]).unwrap_err();
        assert!(matches!(err, ModelError::UnexpectedOutput(_)));
    }
}
