//! Images on disk with run-length encoded masks listed in a CSV file.
//!
//! The CSV has one row per image and class. Two layouts are read:
//!
//! - `ImageId,EncodedPixels`, optionally with a 1-based `ClassId` column. Without it
//!   the rows of an image are taken in class order.
//! - `ImageId_ClassId,EncodedPixels` where the first column is `<image>_<class>`.
//!
//! An empty `EncodedPixels` cell is an empty mask.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use image::{imageops::FilterType, GrayImage};

use crate::{
    dataset::{ImageItem, MaskItem, SegmentationDataset},
    error::{DatasetError, DatasetResult},
    rle::rle_decode,
};

const IMAGE_ID: &str = "ImageId";
const CLASS_ID: &str = "ClassId";
const IMAGE_CLASS_ID: &str = "ImageId_ClassId";
const ENCODED_PIXELS: &str = "EncodedPixels";

/// Images in a directory with their per-class run-length masks.
#[derive(Debug)]
pub struct RleCsvDataset {
    images_dir: PathBuf,
    image_names: Vec<String>,
    rles: HashMap<String, Vec<Option<String>>>,
    source_size: [usize; 2],
    num_classes: usize,
    resize: Option<[usize; 2]>,
    gamma: Option<f32>,
    source: String,
}

impl RleCsvDataset {
    /// Reads the annotations in `csv_path` for images stored in `images_dir`.
    ///
    /// `source_size` is the `[height, width]` of the images, which the run-length
    /// masks are expressed against.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing or the CSV cannot be read.
    pub fn new(
        csv_path: impl AsRef<Path>,
        images_dir: impl AsRef<Path>,
        source_size: [usize; 2],
        num_classes: usize,
    ) -> DatasetResult<Self> {
        let csv_path = csv_path.as_ref();
        let images_dir = images_dir.as_ref().to_path_buf();
        if !images_dir.is_dir() {
            return Err(DatasetError::ImageDirectoryNotFound { path: images_dir });
        }

        let (image_names, rles) = read_annotations(csv_path, num_classes)?;
        tracing::info!(
            images = image_names.len(),
            classes = num_classes,
            path = %csv_path.display(),
            "Loaded run-length annotations"
        );

        Ok(Self {
            images_dir,
            image_names,
            rles,
            source_size,
            num_classes,
            resize: None,
            gamma: None,
            source: "rle".to_string(),
        })
    }

    /// Resize images and masks to `[height, width]` when loading.
    #[must_use]
    pub const fn with_resize(mut self, size: Option<[usize; 2]>) -> Self {
        self.resize = size;
        self
    }

    /// Apply `value^gamma` to every image channel when loading.
    #[must_use]
    pub const fn with_gamma(mut self, gamma: Option<f32>) -> Self {
        self.gamma = gamma;
        self
    }

    /// Source name reported for every sample.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// File name of sample `id`.
    pub fn image_name(&self, id: usize) -> DatasetResult<&str> {
        self.image_names
            .get(id)
            .map(String::as_str)
            .ok_or(DatasetError::SampleNotFound {
                id,
                len: self.image_names.len(),
            })
    }

    fn output_size(&self) -> [usize; 2] {
        self.resize.unwrap_or(self.source_size)
    }
}

impl SegmentationDataset for RleCsvDataset {
    fn image_ids(&self) -> Vec<usize> {
        (0..self.image_names.len()).collect()
    }

    fn load_image(&self, id: usize) -> DatasetResult<ImageItem> {
        let name = self.image_name(id)?;
        let path = self.images_dir.join(name);
        let image = image::open(&path)
            .map_err(|source| DatasetError::ImageOpenFailed {
                path: path.clone(),
                source,
            })?
            .to_rgb32f();

        let [source_height, source_width] = self.source_size;
        if (image.height() as usize, image.width() as usize) != (source_height, source_width) {
            return Err(DatasetError::ShapeMismatch {
                id: name.to_string(),
                expected: format!("{source_height}x{source_width}"),
                actual: format!("{}x{}", image.height(), image.width()),
            });
        }

        let [height, width] = self.output_size();
        let image = match self.resize {
            Some(_) => {
                image::imageops::resize(&image, width as u32, height as u32, FilterType::Triangle)
            }
            None => image,
        };

        let mut data = image.into_raw();
        if let Some(gamma) = self.gamma {
            data.iter_mut().for_each(|value| *value = value.powf(gamma));
        }
        ImageItem::new(data, [height, width, 3])
    }

    fn load_mask(&self, id: usize) -> DatasetResult<MaskItem> {
        let name = self.image_name(id)?;
        let [height, width] = self.output_size();
        let mut data = vec![0.0; height * width * self.num_classes];

        let Some(rles) = self.rles.get(name) else {
            return MaskItem::new(data, [height, width, self.num_classes]);
        };

        for (class, rle) in rles.iter().enumerate() {
            let Some(rle) = rle else { continue };
            let plane = rle_decode(rle, self.source_size).map_err(|err| match err {
                DatasetError::InvalidRle { reason, .. } => DatasetError::InvalidRle {
                    image_id: name.to_string(),
                    reason,
                },
                other => other,
            })?;
            let plane = match self.resize {
                Some(size) => resize_nearest(plane, self.source_size, size, name)?,
                None => plane,
            };
            for (pixel, value) in plane.into_iter().enumerate() {
                data[pixel * self.num_classes + class] = f32::from(value);
            }
        }

        MaskItem::new(data, [height, width, self.num_classes])
    }

    fn source(&self, _id: usize) -> String {
        self.source.clone()
    }

    fn len(&self) -> usize {
        self.image_names.len()
    }
}

fn resize_nearest(
    plane: Vec<u8>,
    [height, width]: [usize; 2],
    [new_height, new_width]: [usize; 2],
    name: &str,
) -> DatasetResult<Vec<u8>> {
    let image = GrayImage::from_raw(width as u32, height as u32, plane).ok_or_else(|| {
        DatasetError::ShapeMismatch {
            id: name.to_string(),
            expected: format!("{height}x{width} mask"),
            actual: "short buffer".to_string(),
        }
    })?;
    let resized = image::imageops::resize(
        &image,
        new_width as u32,
        new_height as u32,
        FilterType::Nearest,
    );
    Ok(resized.into_raw())
}

type Annotations = (Vec<String>, HashMap<String, Vec<Option<String>>>);

fn read_annotations(path: &Path, num_classes: usize) -> DatasetResult<Annotations> {
    let read_failed = |source| DatasetError::AnnotationReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(read_failed)?;
    let headers = reader.headers().map_err(read_failed)?.clone();
    let column = |name: &str| headers.iter().position(|header| header.trim() == name);
    let missing = |column: &str| DatasetError::MissingColumn {
        path: path.to_path_buf(),
        column: column.to_string(),
    };

    let pixels_col = column(ENCODED_PIXELS).ok_or_else(|| missing(ENCODED_PIXELS))?;
    let combined_col = column(IMAGE_CLASS_ID);
    let image_col = column(IMAGE_ID);
    let class_col = column(CLASS_ID);
    if combined_col.is_none() && image_col.is_none() {
        return Err(missing(IMAGE_ID));
    }

    let mut image_names = Vec::new();
    let mut rles: HashMap<String, Vec<Option<String>>> = HashMap::new();

    for record in reader.records() {
        let record = record.map_err(read_failed)?;
        let field = |index: usize| record.get(index).unwrap_or_default().trim();

        let (image_name, class) = match (combined_col, image_col) {
            (Some(index), _) => {
                let (name, class) = split_image_class(field(index), path)?;
                (name.to_string(), Some(class))
            }
            (None, Some(index)) => {
                let class = match class_col {
                    Some(class_index) => Some(parse_class(field(class_index), path)?),
                    None => None,
                };
                (field(index).to_string(), class)
            }
            (None, None) => return Err(missing(IMAGE_ID)),
        };

        let entry = rles.entry(image_name.clone()).or_insert_with(|| {
            image_names.push(image_name.clone());
            Vec::with_capacity(num_classes)
        });
        let class = class.unwrap_or(entry.len());
        if class >= num_classes {
            tracing::warn!(image = %image_name, class, "Skipping annotation of unknown class");
            continue;
        }
        if entry.len() <= class {
            entry.resize(class + 1, None);
        }
        let pixels = field(pixels_col);
        entry[class] = (!pixels.is_empty()).then(|| pixels.to_string());
    }

    Ok((image_names, rles))
}

fn split_image_class<'a>(value: &'a str, path: &Path) -> DatasetResult<(&'a str, usize)> {
    let (name, class) = value
        .rsplit_once('_')
        .ok_or_else(|| DatasetError::MissingColumn {
            path: path.to_path_buf(),
            column: format!("{CLASS_ID} suffix in '{value}'"),
        })?;
    Ok((name, parse_class(class, path)?))
}

fn parse_class(value: &str, path: &Path) -> DatasetResult<usize> {
    match value.parse::<usize>() {
        Ok(class) if class > 0 => Ok(class - 1),
        _ => Err(DatasetError::MissingColumn {
            path: path.to_path_buf(),
            column: format!("valid 1-based {CLASS_ID} (got '{value}')"),
        }),
    }
}
