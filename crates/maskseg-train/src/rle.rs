//! Run-length mask codec.
//!
//! Runs are `start length` pairs with 1-based starts over the pixels in column-major
//! order (down each column first). Decoded masks are row-major `[height, width]`.

use crate::error::{DatasetError, DatasetResult};

/// Decodes `rle` into a row-major `[height, width]` binary mask.
///
/// An empty string decodes to an empty mask.
///
/// # Errors
///
/// Returns [`DatasetError::InvalidRle`] for an odd number of values, a non-integer
/// value, a zero start or a run past the end of the image.
pub fn rle_decode(rle: &str, [height, width]: [usize; 2]) -> DatasetResult<Vec<u8>> {
    let invalid = |reason: String| DatasetError::InvalidRle {
        image_id: String::new(),
        reason,
    };

    let values = rle
        .split_whitespace()
        .map(|value| {
            value
                .parse::<usize>()
                .map_err(|_| invalid(format!("'{value}' is not a pixel count")))
        })
        .collect::<DatasetResult<Vec<_>>>()?;
    if values.len() % 2 != 0 {
        return Err(invalid(format!("{} values do not form pairs", values.len())));
    }

    let total = height * width;
    let mut mask = vec![0u8; total];
    for pair in values.chunks_exact(2) {
        let (start, length) = (pair[0], pair[1]);
        if start == 0 {
            return Err(invalid("starts are 1-based".to_string()));
        }
        let end = start - 1 + length;
        if end > total {
            return Err(invalid(format!(
                "run {start}+{length} exceeds {height}x{width} image"
            )));
        }
        for pixel in start - 1..end {
            let (row, col) = (pixel % height, pixel / height);
            mask[row * width + col] = 1;
        }
    }
    Ok(mask)
}

/// Encodes a row-major `[height, width]` mask; any non-zero pixel is foreground.
pub fn rle_encode(mask: &[u8], [height, width]: [usize; 2]) -> String {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for pixel in 0..height * width {
        let (row, col) = (pixel % height, pixel / height);
        let set = mask.get(row * width + col).is_some_and(|&value| value != 0);
        current = match (current, set) {
            (Some((start, length)), true) => Some((start, length + 1)),
            (None, true) => Some((pixel + 1, 1)),
            (Some(run), false) => {
                runs.push(run);
                None
            }
            (None, false) => None,
        };
    }
    runs.extend(current);

    runs.iter()
        .map(|(start, length)| format!("{start} {length}"))
        .collect::<Vec<_>>()
        .join(" ")
}
