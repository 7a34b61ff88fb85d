//! Background batch production.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use flume::Receiver;

use crate::{
    dataset::SegmentationDataset,
    error::{DatasetError, DatasetResult},
    generator::{DataGenerator, GeneratorConfig, RawBatch},
};

/// Capacity of the queue between workers and the consumer.
pub const QUEUE_CAPACITY: usize = 100;

enum Feed<D: SegmentationDataset + ?Sized> {
    Inline(Box<DataGenerator<D>>),
    Workers {
        receiver: Option<Receiver<DatasetResult<RawBatch>>>,
        handles: Vec<JoinHandle<()>>,
    },
}

/// Produces batches on worker threads, each running its own [`DataGenerator`].
///
/// Worker `k` is seeded with `seed + k` and starts its first pass `k / workers` of
/// the way into the dataset. With zero workers batches are generated on the
/// calling thread. Dropping the feeder stops the workers.
pub struct ParallelFeeder<D: SegmentationDataset + ?Sized + 'static> {
    feed: Feed<D>,
}

impl<D: SegmentationDataset + ?Sized + 'static> ParallelFeeder<D> {
    /// # Errors
    ///
    /// Returns an error if a generator cannot be built or a thread cannot be spawned.
    pub fn spawn(
        dataset: Arc<D>,
        config: &GeneratorConfig,
        workers: usize,
    ) -> DatasetResult<Self> {
        if workers == 0 {
            let generator = DataGenerator::new(dataset, config)?;
            return Ok(Self {
                feed: Feed::Inline(Box::new(generator)),
            });
        }

        let (sender, receiver) = flume::bounded(QUEUE_CAPACITY);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let worker_config = config
                .clone()
                .with_seed(config.seed.wrapping_add(worker as u64));
            let generator = DataGenerator::new(dataset.clone(), &worker_config)?;
            let offset = worker * generator.epoch_len() / workers;
            let generator = generator.starting_at(offset);
            let sender = sender.clone();

            let handle = thread::Builder::new()
                .name(format!("maskseg-feeder-{worker}"))
                .spawn(move || {
                    for batch in generator {
                        if sender.send(batch).is_err() {
                            break;
                        }
                    }
                    tracing::debug!(worker, "Feeder worker stopped");
                })
                .map_err(|source| DatasetError::WorkerSpawnFailed { source })?;
            handles.push(handle);
        }
        tracing::info!(workers, capacity = QUEUE_CAPACITY, "Started data feeder");

        Ok(Self {
            feed: Feed::Workers {
                receiver: Some(receiver),
                handles,
            },
        })
    }

    /// Wait for the next batch.
    ///
    /// # Errors
    ///
    /// Returns the generator's error, or [`DatasetError::FeederDisconnected`] once
    /// every worker has stopped.
    pub fn next_batch(&mut self) -> DatasetResult<RawBatch> {
        match &mut self.feed {
            Feed::Inline(generator) => generator
                .next()
                .unwrap_or(Err(DatasetError::FeederDisconnected)),
            Feed::Workers { receiver, .. } => receiver
                .as_ref()
                .ok_or(DatasetError::FeederDisconnected)?
                .recv()
                .map_err(|_| DatasetError::FeederDisconnected)?,
        }
    }
}

impl<D: SegmentationDataset + ?Sized + 'static> Iterator for ParallelFeeder<D> {
    type Item = DatasetResult<RawBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Err(DatasetError::FeederDisconnected) => None,
            batch => Some(batch),
        }
    }
}

impl<D: SegmentationDataset + ?Sized + 'static> Drop for ParallelFeeder<D> {
    fn drop(&mut self) {
        if let Feed::Workers { receiver, handles } = &mut self.feed {
            // Workers blocked on a full queue wake up once the receiver is gone.
            drop(receiver.take());
            for handle in handles.drain(..) {
                if handle.join().is_err() {
                    tracing::warn!("Feeder worker panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::dataset::tests::constant_dataset;

    fn config() -> GeneratorConfig {
        GeneratorConfig::new()
            .with_batch_size(2)
            .with_mean_pixel(vec![0.0; 3])
    }

    #[test]
    fn inline_feeder_matches_generator() {
        let dataset = Arc::new(constant_dataset(4, 1, 1));
        let mut feeder =
            ParallelFeeder::spawn(dataset, &config().with_shuffle(false), 0).unwrap();

        assert_eq!(feeder.next_batch().unwrap().ids(), vec![0, 1]);
        assert_eq!(feeder.next_batch().unwrap().ids(), vec![2, 3]);
    }

    #[test]
    fn workers_cover_the_dataset() {
        let dataset = Arc::new(constant_dataset(8, 2, 1));
        let feeder = ParallelFeeder::spawn(dataset, &config(), 2).unwrap();

        let mut seen = HashSet::new();
        for batch in feeder.take(20) {
            let batch = batch.unwrap();
            assert_eq!(batch.len(), 2);
            assert_eq!(batch.samples[0].image.shape, [2, 2, 3]);
            seen.extend(batch.ids());
        }

        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn dropping_feeder_stops_workers() {
        let dataset = Arc::new(constant_dataset(4, 1, 1));
        let mut feeder = ParallelFeeder::spawn(dataset, &config(), 3).unwrap();
        feeder.next_batch().unwrap();

        // Joins every worker; hangs if one keeps running.
        drop(feeder);
    }

    #[test]
    fn empty_dataset_fails_to_spawn() {
        let dataset = Arc::new(constant_dataset(0, 1, 1));
        assert!(ParallelFeeder::spawn(dataset, &config(), 2).is_err());
    }
}
