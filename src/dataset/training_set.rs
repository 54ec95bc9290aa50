//! Ordered collection of training images with their targets and samples.

use crate::core::error::{ForestError, Result};
use crate::core::types::{
    LabelValue, PixelIndex, TaskKind, ROTATION_OUTPUT_DIM, ROTATION_RECORD_LEN,
};
use crate::dataset::image::{Image, LabelMap};
use crate::dataset::sampler::ImageSampler;
use crate::tree::split::rotation::{rotation_from_euler, rotation_record};

/// What an image is trained against.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageTarget {
    /// One class label per pixel.
    Labels(LabelMap),
    /// One orientation (Euler angles about x, y, z) for the whole image.
    Rotation([f32; ROTATION_OUTPUT_DIM]),
}

/// One image of a training set.
#[derive(Debug, Clone)]
pub struct TrainingImage {
    image: Image,
    target: ImageTarget,
    samples: Vec<PixelIndex>,
    priors: Vec<f32>,
    record: [f64; ROTATION_RECORD_LEN],
}

impl TrainingImage {
    /// Builds a classification image from explicit samples.
    ///
    /// Samples must be sorted, unique, in range and labelled.
    pub fn classification(
        image: Image,
        labels: LabelMap,
        samples: Vec<PixelIndex>,
        n_classes: usize,
    ) -> Result<Self> {
        if !image.same_size(labels.width(), labels.height()) {
            return Err(ForestError::data_dimension_mismatch(format!(
                "image {}x{} vs labels {}x{}",
                image.width(),
                image.height(),
                labels.width(),
                labels.height()
            )));
        }
        if labels.max_label() as usize > n_classes {
            return Err(ForestError::dataset(format!(
                "label {} exceeds the {} configured classes",
                labels.max_label(),
                n_classes
            )));
        }
        check_samples(&samples, image.num_pixels())?;

        let label_data = labels.data();
        let mut counts = vec![0u64; n_classes];
        for pixel in &samples {
            match label_data[*pixel as usize] {
                0 => {
                    return Err(ForestError::dataset(format!(
                        "sampled pixel {} is unlabelled",
                        pixel
                    )))
                }
                label => counts[label as usize - 1] += 1,
            }
        }
        let total = samples.len().max(1) as f32;
        let priors = counts.iter().map(|c| *c as f32 / total).collect();

        Ok(TrainingImage {
            image,
            target: ImageTarget::Labels(labels),
            samples,
            priors,
            record: [0.0; ROTATION_RECORD_LEN],
        })
    }

    /// Builds a rotation-regression image from explicit samples.
    pub fn regression(
        image: Image,
        euler: [f32; ROTATION_OUTPUT_DIM],
        samples: Vec<PixelIndex>,
    ) -> Result<Self> {
        check_samples(&samples, image.num_pixels())?;
        let rotation = rotation_from_euler([euler[0] as f64, euler[1] as f64, euler[2] as f64]);
        Ok(TrainingImage {
            image,
            target: ImageTarget::Rotation(euler),
            samples,
            priors: Vec::new(),
            record: rotation_record(&rotation),
        })
    }

    /// Pixel data.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Training target.
    pub fn target(&self) -> &ImageTarget {
        &self.target
    }

    /// Sorted sampled pixel indices.
    pub fn samples(&self) -> &[PixelIndex] {
        &self.samples
    }

    /// Number of sampled pixels.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Class distribution of the sampled pixels (classification only).
    pub fn priors(&self) -> &[f32] {
        &self.priors
    }

    /// Class index (`label - 1`) of a pixel, `None` when unlabelled or when
    /// the image carries a rotation target.
    #[inline]
    pub fn class_of(&self, pixel: PixelIndex) -> Option<usize> {
        match &self.target {
            ImageTarget::Labels(labels) => match labels.data().get(pixel as usize).copied() {
                Some(0) | None => None,
                Some(label) => Some(label as usize - 1),
            },
            ImageTarget::Rotation(_) => None,
        }
    }

    /// Histogram record of the image rotation (regression only).
    #[inline]
    pub fn rotation_record(&self) -> &[f64; ROTATION_RECORD_LEN] {
        &self.record
    }
}

fn check_samples(samples: &[PixelIndex], num_pixels: usize) -> Result<()> {
    if !samples.windows(2).all(|w| w[0] < w[1]) {
        return Err(ForestError::dataset(
            "sampled pixel list must be sorted and free of duplicates",
        ));
    }
    if let Some(last) = samples.last() {
        if *last as usize >= num_pixels {
            return Err(ForestError::index_out_of_bounds(*last as usize, num_pixels));
        }
    }
    Ok(())
}

/// Ordered training images plus the statistics the trainer sizes itself from.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    kind: TaskKind,
    n_classes: usize,
    images: Vec<TrainingImage>,
    priors: Vec<f32>,
}

impl TrainingSet {
    /// Builds a classification set, sampling each image with `sampler`.
    ///
    /// Pairs whose image and label map differ in size are skipped.
    pub fn classification<I>(pairs: I, n_classes: usize, sampler: &dyn ImageSampler) -> Result<Self>
    where
        I: IntoIterator<Item = (Image, LabelMap)>,
    {
        let mut images = Vec::new();
        for (index, (image, labels)) in pairs.into_iter().enumerate() {
            if !image.same_size(labels.width(), labels.height()) {
                log::warn!(
                    "skipping training pair {}: image is {}x{} but labels are {}x{}",
                    index,
                    image.width(),
                    image.height(),
                    labels.width(),
                    labels.height()
                );
                continue;
            }
            let samples = sampler.sample(&image, labels.data());
            images.push(TrainingImage::classification(image, labels, samples, n_classes)?);
        }
        Self::from_images(TaskKind::Classification, n_classes, images)
    }

    /// Builds a rotation-regression set. Pixels whose first channel is
    /// positive are eligible for sampling.
    pub fn regression<I>(items: I, sampler: &dyn ImageSampler) -> Result<Self>
    where
        I: IntoIterator<Item = (Image, [f32; ROTATION_OUTPUT_DIM])>,
    {
        let mut images = Vec::new();
        for (image, euler) in items {
            let channels = image.channels().max(1);
            let mask: Vec<LabelValue> = image
                .data()
                .chunks(channels)
                .map(|pixel| u8::from(pixel[0] > 0.0))
                .collect();
            let samples = sampler.sample(&image, &mask);
            images.push(TrainingImage::regression(image, euler, samples)?);
        }
        Self::from_images(TaskKind::RotationRegression, 0, images)
    }

    /// Assembles a set from prepared images.
    pub fn from_images(kind: TaskKind, n_classes: usize, images: Vec<TrainingImage>) -> Result<Self> {
        if images.is_empty() {
            return Err(ForestError::dataset("training set holds no usable image"));
        }
        if kind == TaskKind::Classification && n_classes == 0 {
            return Err(ForestError::invalid_parameter(
                "n_classes",
                "0",
                "classification needs at least one class",
            ));
        }
        for (index, image) in images.iter().enumerate() {
            let matches = matches!(
                (kind, image.target()),
                (TaskKind::Classification, ImageTarget::Labels(_))
                    | (TaskKind::RotationRegression, ImageTarget::Rotation(_))
            );
            if !matches || (kind == TaskKind::Classification && image.priors.len() != n_classes) {
                return Err(ForestError::dataset(format!(
                    "image {} does not carry a {} target",
                    index, kind
                )));
            }
        }

        let mut priors = vec![0.0f32; n_classes];
        for image in &images {
            for (acc, p) in priors.iter_mut().zip(image.priors()) {
                *acc += *p;
            }
        }
        let n_images = images.len() as f32;
        priors.iter_mut().for_each(|p| *p /= n_images);

        log::info!(
            "training set ready: {} images, {} samples, {}",
            images.len(),
            images.iter().map(|i| i.num_samples()).sum::<usize>(),
            kind
        );

        Ok(TrainingSet {
            kind,
            n_classes,
            images,
            priors,
        })
    }

    /// Task the set was built for.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Number of classes (0 for regression).
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Training images in order.
    pub fn images(&self) -> &[TrainingImage] {
        &self.images
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Mean of the per-image class priors.
    pub fn priors(&self) -> &[f32] {
        &self.priors
    }

    /// Widest image.
    pub fn max_width(&self) -> usize {
        self.images.iter().map(|i| i.image.width()).max().unwrap_or(0)
    }

    /// Tallest image.
    pub fn max_height(&self) -> usize {
        self.images.iter().map(|i| i.image.height()).max().unwrap_or(0)
    }

    /// Channels per pixel (the largest across images).
    pub fn channels(&self) -> usize {
        self.images.iter().map(|i| i.image.channels()).max().unwrap_or(0)
    }

    /// Largest per-image sample count.
    pub fn max_samples(&self) -> usize {
        self.images.iter().map(|i| i.num_samples()).max().unwrap_or(0)
    }

    /// Sum of all sample counts.
    pub fn total_samples(&self) -> usize {
        self.images.iter().map(|i| i.num_samples()).sum()
    }
}
