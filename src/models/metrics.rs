use crate::types::TrainingMetrics;

pub fn rmse(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return None;
    }
    let sse: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    Some((sse / n as f64).sqrt())
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return None;
    }
    let sae: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum();
    Some(sae / n as f64)
}

/// Coefficient of determination; `None` when the actuals have no variance.
pub fn r2(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let n = actual.len().min(predicted.len());
    if n < 2 {
        return None;
    }
    let mean = actual[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot <= f64::EPSILON {
        return None;
    }
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    Some(1.0 - ss_res / ss_tot)
}

/// Share of steps where the predicted move from `previous` has the sign of the actual move.
/// Flat actual moves are skipped.
pub fn directional_accuracy(previous: &[f64], actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let mut scored = 0usize;
    let mut correct = 0usize;
    for ((prev, a), p) in previous.iter().zip(actual).zip(predicted) {
        let actual_move = a - prev;
        if actual_move == 0.0 {
            continue;
        }
        scored += 1;
        if (p - prev).signum() == actual_move.signum() {
            correct += 1;
        }
    }
    (scored > 0).then(|| correct as f64 / scored as f64)
}

/// Train/validation metrics from aligned (previous, actual, predicted) price triples.
pub fn training_metrics(
    train: (&[f64], &[f64], &[f64]),
    validation: (&[f64], &[f64], &[f64]),
) -> TrainingMetrics {
    let (_, train_actual, train_pred) = train;
    let (val_prev, val_actual, val_pred) = validation;
    TrainingMetrics {
        train_rmse: rmse(train_actual, train_pred),
        train_mae: mae(train_actual, train_pred),
        train_r2: r2(train_actual, train_pred),
        val_rmse: rmse(val_actual, val_pred),
        val_mae: mae(val_actual, val_pred),
        val_r2: r2(val_actual, val_pred),
        directional_accuracy: directional_accuracy(val_prev, val_actual, val_pred),
    }
}
