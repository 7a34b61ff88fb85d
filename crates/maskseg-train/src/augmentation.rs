//! Geometric augmentation applied identically to an image and its masks.
//!
//! Every channel is warped as its own single-channel plane, so images and masks of
//! any channel count share one code path. Images are resampled bilinearly and masks
//! by nearest neighbour so they stay binary.

use image::{imageops, ImageBuffer, Luma};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dataset::{ImageItem, MaskItem};

type Plane = ImageBuffer<Luma<f32>, Vec<f32>>;

/// One augmentation step and the probability it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AugmentationMethod {
    HorizontalFlip {
        probability: f64,
    },
    VerticalFlip {
        probability: f64,
    },
    /// Random affine transform about the image centre.
    ShiftScaleRotate {
        probability: f64,
        /// Maximum shift as a fraction of the image size.
        shift_limit: f32,
        /// Scale is drawn from `1 ± scale_limit`.
        scale_limit: f32,
        /// Maximum rotation in degrees.
        rotate_limit: f32,
    },
}

/// Ordered list of augmentation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    pub methods: Vec<AugmentationMethod>,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            methods: vec![
                AugmentationMethod::HorizontalFlip { probability: 0.5 },
                AugmentationMethod::VerticalFlip { probability: 0.5 },
                AugmentationMethod::ShiftScaleRotate {
                    probability: 0.5,
                    shift_limit: 0.1,
                    scale_limit: 0.1,
                    rotate_limit: 30.0,
                },
            ],
        }
    }
}

impl AugmentationConfig {
    /// No augmentation at all.
    pub const fn none() -> Self {
        Self {
            methods: Vec::new(),
        }
    }
}

/// Applies an [`AugmentationConfig`] with its own seeded random stream.
pub struct ImageAugmentor {
    config: AugmentationConfig,
    rng: StdRng,
}

impl ImageAugmentor {
    pub fn new(config: AugmentationConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.methods.is_empty()
    }

    /// Apply every configured step to `image` and `mask`.
    pub fn augment(&mut self, mut image: ImageItem, mut mask: MaskItem) -> (ImageItem, MaskItem) {
        for method in self.config.methods.clone() {
            (image, mask) = match method {
                AugmentationMethod::HorizontalFlip { probability } => {
                    if self.fires(probability) {
                        flip_horizontal(image, mask)
                    } else {
                        (image, mask)
                    }
                }
                AugmentationMethod::VerticalFlip { probability } => {
                    if self.fires(probability) {
                        flip_vertical(image, mask)
                    } else {
                        (image, mask)
                    }
                }
                AugmentationMethod::ShiftScaleRotate {
                    probability,
                    shift_limit,
                    scale_limit,
                    rotate_limit,
                } => {
                    if self.fires(probability) {
                        let [height, width, _] = image.shape;
                        let projection = self.shift_scale_rotate(
                            [height, width],
                            shift_limit,
                            scale_limit,
                            rotate_limit,
                        );
                        apply_projection(image, mask, &projection)
                    } else {
                        (image, mask)
                    }
                }
            };
        }
        (image, mask)
    }

    fn fires(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    fn shift_scale_rotate(
        &mut self,
        [height, width]: [usize; 2],
        shift_limit: f32,
        scale_limit: f32,
        rotate_limit: f32,
    ) -> Projection {
        let (shift_limit, scale_limit, rotate_limit) =
            (shift_limit.abs(), scale_limit.abs(), rotate_limit.abs());
        let angle: f32 = self.rng.gen_range(-rotate_limit..=rotate_limit);
        let scale: f32 = self.rng.gen_range(1.0 - scale_limit..=1.0 + scale_limit);
        let dx: f32 = self.rng.gen_range(-shift_limit..=shift_limit);
        let dy: f32 = self.rng.gen_range(-shift_limit..=shift_limit);

        let (width, height) = (width as f32, height as f32);
        let (cx, cy) = (width / 2.0, height / 2.0);
        Projection::translate(cx + dx * width, cy + dy * height)
            * Projection::rotate(angle.to_radians())
            * Projection::scale(scale, scale)
            * Projection::translate(-cx, -cy)
    }
}

fn flip_horizontal(image: ImageItem, mask: MaskItem) -> (ImageItem, MaskItem) {
    (
        ImageItem {
            data: map_planes(&image.data, image.shape, |plane| imageops::flip_horizontal(plane)),
            shape: image.shape,
        },
        MaskItem {
            data: map_planes(&mask.data, mask.shape, |plane| imageops::flip_horizontal(plane)),
            shape: mask.shape,
        },
    )
}

fn flip_vertical(image: ImageItem, mask: MaskItem) -> (ImageItem, MaskItem) {
    (
        ImageItem {
            data: map_planes(&image.data, image.shape, |plane| imageops::flip_vertical(plane)),
            shape: image.shape,
        },
        MaskItem {
            data: map_planes(&mask.data, mask.shape, |plane| imageops::flip_vertical(plane)),
            shape: mask.shape,
        },
    )
}

fn apply_projection(
    image: ImageItem,
    mask: MaskItem,
    projection: &Projection,
) -> (ImageItem, MaskItem) {
    (
        ImageItem {
            data: map_planes(&image.data, image.shape, |plane| {
                warp(plane, projection, Interpolation::Bilinear, Luma([0.0]))
            }),
            shape: image.shape,
        },
        MaskItem {
            data: map_planes(&mask.data, mask.shape, |plane| {
                warp(plane, projection, Interpolation::Nearest, Luma([0.0]))
            }),
            shape: mask.shape,
        },
    )
}

/// Runs `f` over every channel of an interleaved `[height, width, channels]` buffer.
fn map_planes(
    data: &[f32],
    [height, width, channels]: [usize; 3],
    f: impl Fn(&Plane) -> Plane,
) -> Vec<f32> {
    let mut out = vec![0.0; data.len()];
    for channel in 0..channels {
        let plane = Plane::from_fn(width as u32, height as u32, |x, y| {
            Luma([data[(y as usize * width + x as usize) * channels + channel]])
        });
        for (x, y, pixel) in f(&plane).enumerate_pixels() {
            out[(y as usize * width + x as usize) * channels + channel] = pixel.0[0];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(height: usize, width: usize, channels: usize) -> Vec<f32> {
        (0..height * width * channels).map(|value| value as f32).collect()
    }

    fn sample(height: usize, width: usize) -> (ImageItem, MaskItem) {
        let image = ImageItem::new(ramp(height, width, 3), [height, width, 3]).unwrap();
        let mask_data = (0..height * width * 2)
            .map(|index| f32::from(u8::from(index % 3 == 0)))
            .collect();
        let mask = MaskItem::new(mask_data, [height, width, 2]).unwrap();
        (image, mask)
    }

    fn only(method: AugmentationMethod) -> AugmentationConfig {
        AugmentationConfig {
            methods: vec![method],
        }
    }

    #[test]
    fn default_config_matches_flip_flip_affine() {
        let config = AugmentationConfig::default();
        assert_eq!(config.methods.len(), 3);
        assert!(matches!(
            config.methods[2],
            AugmentationMethod::ShiftScaleRotate { rotate_limit, .. } if rotate_limit == 30.0
        ));
        assert!(!ImageAugmentor::new(AugmentationConfig::none(), 0).is_enabled());
    }

    #[test]
    fn horizontal_flip_mirrors_columns_of_image_and_mask() {
        let (image, mask) = sample(2, 3);
        let mut augmentor =
            ImageAugmentor::new(only(AugmentationMethod::HorizontalFlip { probability: 1.0 }), 7);

        let (flipped, flipped_mask) = augmentor.augment(image.clone(), mask.clone());

        // pixel (0, 0) now holds pixel (0, 2)
        assert_eq!(&flipped.data[0..3], &image.data[6..9]);
        assert_eq!(&flipped_mask.data[0..2], &mask.data[4..6]);
        assert_eq!(flipped.shape, image.shape);
    }

    #[test]
    fn vertical_flip_mirrors_rows() {
        let (image, mask) = sample(2, 2);
        let mut augmentor =
            ImageAugmentor::new(only(AugmentationMethod::VerticalFlip { probability: 1.0 }), 7);

        let (flipped, _) = augmentor.augment(image.clone(), mask);

        assert_eq!(&flipped.data[0..6], &image.data[6..12]);
    }

    #[test]
    fn zero_probability_leaves_sample_untouched() {
        let (image, mask) = sample(4, 4);
        let mut augmentor = ImageAugmentor::new(
            AugmentationConfig {
                methods: vec![
                    AugmentationMethod::HorizontalFlip { probability: 0.0 },
                    AugmentationMethod::ShiftScaleRotate {
                        probability: 0.0,
                        shift_limit: 0.1,
                        scale_limit: 0.1,
                        rotate_limit: 30.0,
                    },
                ],
            },
            3,
        );

        let (out_image, out_mask) = augmentor.augment(image.clone(), mask.clone());

        assert_eq!(out_image, image);
        assert_eq!(out_mask, mask);
    }

    #[test]
    fn shift_scale_rotate_keeps_masks_binary() {
        let (image, mask) = sample(8, 8);
        let mut augmentor = ImageAugmentor::new(
            only(AugmentationMethod::ShiftScaleRotate {
                probability: 1.0,
                shift_limit: 0.1,
                scale_limit: 0.1,
                rotate_limit: 30.0,
            }),
            11,
        );

        let (out_image, out_mask) = augmentor.augment(image, mask);

        assert_eq!(out_image.shape, [8, 8, 3]);
        assert_eq!(out_mask.shape, [8, 8, 2]);
        assert!(out_mask.data.iter().all(|&value| value == 0.0 || value == 1.0));
    }

    #[test]
    fn same_seed_gives_same_augmentation() {
        let (image, mask) = sample(8, 8);
        let config = AugmentationConfig::default();

        let first = ImageAugmentor::new(config.clone(), 5).augment(image.clone(), mask.clone());
        let second = ImageAugmentor::new(config, 5).augment(image, mask);

        assert_eq!(first, second);
    }
}
