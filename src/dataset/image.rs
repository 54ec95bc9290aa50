//! Host-side image planes and per-pixel label maps.

use crate::core::error::{ForestError, Result};
use crate::core::types::LabelValue;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Multi-channel `f32` image stored as `[height, width, channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: Array3<f32>,
}

impl Image {
    /// Creates a zero-filled image.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Image {
            pixels: Array3::zeros((height, width, channels)),
        }
    }

    /// Wraps row-major interleaved pixel data.
    pub fn from_vec(width: usize, height: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        let pixels = Array3::from_shape_vec((height, width, channels), data).map_err(|e| {
            ForestError::data_dimension_mismatch(format!(
                "{}x{}x{} image: {}",
                width, height, channels, e
            ))
        })?;
        Ok(Image { pixels })
    }

    /// Takes ownership of a `[height, width, channels]` array.
    pub fn from_array(pixels: Array3<f32>) -> Self {
        let pixels = if pixels.is_standard_layout() {
            pixels
        } else {
            pixels.as_standard_layout().into_owned()
        };
        Image { pixels }
    }

    /// Builds a single-channel image from a `[height, width]` plane.
    pub fn from_plane(plane: ArrayView2<'_, f32>) -> Self {
        let (height, width) = plane.dim();
        let mut pixels = Array3::zeros((height, width, 1));
        pixels
            .index_axis_mut(ndarray::Axis(2), 0)
            .assign(&plane);
        Image { pixels }
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    /// Channels per pixel.
    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    /// Number of pixels.
    pub fn num_pixels(&self) -> usize {
        self.width() * self.height()
    }

    /// Value of channel `c` at `(x, y)`.
    pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
        self.pixels[[y, x, c]]
    }

    /// Sets channel `c` at `(x, y)`.
    pub fn set(&mut self, x: usize, y: usize, c: usize, value: f32) {
        self.pixels[[y, x, c]] = value;
    }

    /// Interleaved row-major pixel data.
    pub fn data(&self) -> &[f32] {
        // every constructor keeps the array in standard layout
        self.pixels.as_slice().unwrap_or(&[])
    }

    /// Array view of the pixels.
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.pixels.view()
    }

    /// Whether both images share width and height.
    pub fn same_size(&self, width: usize, height: usize) -> bool {
        self.width() == width && self.height() == height
    }
}

/// Per-pixel labels stored as `[height, width]`. Label `0` is unlabelled,
/// labels `1..=n_classes` name classes `0..n_classes`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    labels: Array2<LabelValue>,
}

impl LabelMap {
    /// Creates an all-unlabelled map.
    pub fn new(width: usize, height: usize) -> Self {
        LabelMap {
            labels: Array2::zeros((height, width)),
        }
    }

    /// Wraps row-major label data.
    pub fn from_vec(width: usize, height: usize, data: Vec<LabelValue>) -> Result<Self> {
        let labels = Array2::from_shape_vec((height, width), data).map_err(|e| {
            ForestError::data_dimension_mismatch(format!("{}x{} label map: {}", width, height, e))
        })?;
        Ok(LabelMap { labels })
    }

    /// Takes ownership of a `[height, width]` array.
    pub fn from_array(labels: Array2<LabelValue>) -> Self {
        let labels = if labels.is_standard_layout() {
            labels
        } else {
            labels.as_standard_layout().into_owned()
        };
        LabelMap { labels }
    }

    /// Map width.
    pub fn width(&self) -> usize {
        self.labels.dim().1
    }

    /// Map height.
    pub fn height(&self) -> usize {
        self.labels.dim().0
    }

    /// Label at `(x, y)`.
    pub fn get(&self, x: usize, y: usize) -> LabelValue {
        self.labels[[y, x]]
    }

    /// Sets the label at `(x, y)`.
    pub fn set(&mut self, x: usize, y: usize, label: LabelValue) {
        self.labels[[y, x]] = label;
    }

    /// Row-major label data.
    pub fn data(&self) -> &[LabelValue] {
        self.labels.as_slice().unwrap_or(&[])
    }

    /// Array view of the labels.
    pub fn view(&self) -> ArrayView2<'_, LabelValue> {
        self.labels.view()
    }

    /// Largest label present.
    pub fn max_label(&self) -> LabelValue {
        self.labels.iter().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_image_layout() {
        let image = Image::from_vec(3, 2, 1, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 2);
        assert_eq!(image.get(2, 1, 0), 5.0);
        assert_eq!(image.data()[4], 4.0);
    }

    #[test]
    fn test_image_shape_error() {
        assert!(matches!(
            Image::from_vec(3, 2, 1, vec![0.0; 5]),
            Err(ForestError::DataDimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_from_plane_and_transposed_array() {
        let plane = array![[1.0f32, 2.0], [3.0, 4.0]];
        let image = Image::from_plane(plane.view());
        assert_eq!(image.get(1, 0, 0), 2.0);

        let transposed = Array3::from_shape_vec((2, 2, 1), vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .permuted_axes([1, 0, 2]);
        let image = Image::from_array(transposed);
        assert_eq!(image.data(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_label_map() {
        let mut labels = LabelMap::new(2, 2);
        labels.set(1, 1, 3);
        assert_eq!(labels.get(1, 1), 3);
        assert_eq!(labels.data(), &[0, 0, 0, 3]);
        assert_eq!(labels.max_label(), 3);
    }
}
