//! Pixel feature responses evaluated by the kernels.

use crate::core::types::FeatureValue;
use crate::device::kernels::ImageView;

/// Computes the scalar response of one feature vector at one pixel.
///
/// The histogram and predict kernels share one extractor, so a sample's
/// node assignment during training and prediction always agree.
pub trait FeatureExtractor: Send + Sync + 'static {
    /// Length of the feature vectors this extractor understands.
    fn feat_dim(&self) -> usize;

    /// Short identifier used in build logs.
    fn name(&self) -> &'static str;

    /// Response of `feature` at pixel `(x, y)`.
    fn response(&self, image: &ImageView<'_>, x: usize, y: usize, feature: &[FeatureValue]) -> f32;

    /// Reports a configuration problem that prevents kernel construction.
    fn check(&self) -> std::result::Result<(), String> {
        if self.feat_dim() == 0 {
            return Err(format!("{}: feature dimension must be positive", self.name()));
        }
        Ok(())
    }
}

/// Reads one channel at an integer offset from the pixel.
///
/// `feature = [dx, dy]`; offsets are rounded to the nearest pixel and probes
/// outside the image return `background`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelProbeFeature {
    channel: usize,
    background: f32,
}

impl Default for PixelProbeFeature {
    fn default() -> Self {
        PixelProbeFeature {
            channel: 0,
            background: 0.0,
        }
    }
}

impl PixelProbeFeature {
    /// Probe on channel 0 with a zero background.
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe on another channel.
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    /// Value returned for probes outside the image.
    pub fn with_background(mut self, background: f32) -> Self {
        self.background = background;
        self
    }
}

impl FeatureExtractor for PixelProbeFeature {
    fn feat_dim(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "pixel-probe"
    }

    #[inline]
    fn response(&self, image: &ImageView<'_>, x: usize, y: usize, feature: &[FeatureValue]) -> f32 {
        let px = x as isize + feature[0].round() as isize;
        let py = y as isize + feature[1].round() as isize;
        image.fetch(px, py, self.channel).unwrap_or(self.background)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if !self.background.is_finite() {
            return Err("pixel-probe: background must be finite".to_string());
        }
        Ok(())
    }
}

/// Depth-invariant probe difference on a depth channel.
///
/// `feature = [dx, dy]`: with `d` the depth at the pixel, the response is
/// `I(x + dx*scale/d, y + dy*scale/d) - d`. Probes outside the image or on
/// zero depth read `background`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthInvariantFeature {
    scale: f32,
    background: f32,
}

impl Default for DepthInvariantFeature {
    fn default() -> Self {
        DepthInvariantFeature {
            scale: 1000.0,
            background: 10_000.0,
        }
    }
}

impl DepthInvariantFeature {
    /// Millimetre depth with a 10 m background.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset scale (offsets are expressed at depth `scale`).
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Value of invalid probes.
    pub fn with_background(mut self, background: f32) -> Self {
        self.background = background;
        self
    }

    #[inline]
    fn depth_at(&self, image: &ImageView<'_>, x: isize, y: isize) -> f32 {
        match image.fetch(x, y, 0) {
            Some(d) if d > 0.0 => d,
            _ => self.background,
        }
    }
}

impl FeatureExtractor for DepthInvariantFeature {
    fn feat_dim(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "depth-invariant"
    }

    #[inline]
    fn response(&self, image: &ImageView<'_>, x: usize, y: usize, feature: &[FeatureValue]) -> f32 {
        let depth = self.depth_at(image, x as isize, y as isize);
        let factor = self.scale / depth;
        let px = x as isize + (feature[0] * factor).round() as isize;
        let py = y as isize + (feature[1] * factor).round() as isize;
        self.depth_at(image, px, py) - depth
    }

    fn check(&self) -> std::result::Result<(), String> {
        if !(self.scale > 0.0 && self.background > 0.0) {
            return Err("depth-invariant: scale and background must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(pixels: &[f32]) -> ImageView<'_> {
        ImageView::new(pixels, 3, 2, 4, 1)
    }

    #[test]
    fn test_probe_reads_offset_pixel() {
        let pixels = [1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0];
        let image = view(&pixels);
        let probe = PixelProbeFeature::new();
        assert_eq!(probe.response(&image, 0, 0, &[0.0, 0.0]), 1.0);
        assert_eq!(probe.response(&image, 0, 0, &[2.2, 0.9]), 6.0);
        assert_eq!(probe.response(&image, 0, 0, &[-1.0, 0.0]), 0.0);
        // The padding column is outside the image.
        assert_eq!(probe.response(&image, 2, 0, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_depth_invariant_scales_offsets() {
        let pixels = [1000.0, 1000.0, 1500.0, 0.0, 2000.0, 0.0, 1000.0, 0.0];
        let image = view(&pixels);
        let feature = DepthInvariantFeature::new();
        assert_eq!(feature.response(&image, 0, 0, &[2.0, 0.0]), 500.0);
        // Offset halves at twice the depth.
        assert_eq!(feature.response(&image, 0, 1, &[2.0, 0.0]), -2000.0 + 10_000.0);
    }

    #[test]
    fn test_check_rejects_bad_parameters() {
        assert!(PixelProbeFeature::new().with_background(f32::NAN).check().is_err());
        assert!(DepthInvariantFeature::new().with_scale(0.0).check().is_err());
        assert!(DepthInvariantFeature::new().check().is_ok());
    }
}
