//! Hooks called by the training loop.

use serde::{Deserialize, Serialize};

/// Averaged metrics of one training epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Number of completed epochs, including this one.
    pub epoch: usize,
    pub loss: f64,
    pub mask_loss: f64,
    pub mask_accuracy: f64,
    pub dice_coef: f64,
    pub val_loss: f64,
    pub val_mask_loss: f64,
    pub val_mask_accuracy: f64,
    pub val_dice_coef: f64,
}

pub trait TrainingCallback {
    /// Called after the checkpoint of the epoch has been written.
    fn on_epoch_end(&mut self, summary: &EpochSummary);
}

/// Keeps every epoch summary.
#[derive(Debug, Default)]
pub struct History {
    pub epochs: Vec<EpochSummary>,
}

impl TrainingCallback for History {
    fn on_epoch_end(&mut self, summary: &EpochSummary) {
        self.epochs.push(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(epoch: usize) -> EpochSummary {
        EpochSummary {
            epoch,
            loss: 1.0 / epoch as f64,
            mask_loss: 0.5,
            mask_accuracy: 0.25,
            dice_coef: 0.5,
            val_loss: 1.5,
            val_mask_loss: 0.75,
            val_mask_accuracy: 0.125,
            val_dice_coef: 0.375,
        }
    }

    #[test]
    fn history_keeps_summaries_in_order() {
        let mut history = History::default();
        let callbacks: &mut [&mut dyn TrainingCallback] = &mut [&mut history];
        for epoch in 1..=3 {
            for callback in callbacks.iter_mut() {
                callback.on_epoch_end(&summary(epoch));
            }
        }

        let epochs: Vec<usize> = history.epochs.iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![1, 2, 3]);
        assert_eq!(history.epochs[1], summary(2));
    }

    #[test]
    fn summary_serializes_with_field_names() {
        let json = serde_json::to_value(summary(4)).unwrap();
        assert_eq!(json["epoch"], 4);
        assert_eq!(json["val_mask_accuracy"], 0.125);
        assert_eq!(json["val_dice_coef"], 0.375);
    }
}
