//! Host samples to device tensors.

use std::marker::PhantomData;

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use maskseg_model::MaskBatch;

use crate::generator::{MaskSample, RawBatch};

/// Turns [`MaskSample`]s into a [`MaskBatch`] of `[N, C, H, W]` tensors.
#[derive(Clone, Default)]
pub struct MaskBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> MaskBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }

    /// Batch every sample of a generated [`RawBatch`].
    pub fn batch_raw(&self, raw: RawBatch, device: &B::Device) -> MaskBatch<B> {
        self.batch(raw.samples, device)
    }
}

impl<B: Backend> Batcher<B, MaskSample, MaskBatch<B>> for MaskBatcher<B> {
    fn batch(&self, items: Vec<MaskSample>, device: &B::Device) -> MaskBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut masks = Vec::with_capacity(items.len());

        for MaskSample { image, mask, .. } in items {
            // HWC to CHW
            images.push(
                Tensor::<B, 3>::from_data(TensorData::new(image.data, image.shape), device)
                    .permute([2, 0, 1]),
            );
            masks.push(
                Tensor::<B, 3>::from_data(TensorData::new(mask.data, mask.shape), device)
                    .permute([2, 0, 1]),
            );
        }

        MaskBatch::new(Tensor::stack(images, 0), Tensor::stack(masks, 0))
    }
}
