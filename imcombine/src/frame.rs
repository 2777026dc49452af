//! Frame container: image data with mask, uncertainty and physical unit.

use std::fmt;

use num_traits::Float;

use crate::combine::{CombineMethod, Error};
use crate::common::{Buffer2, Shape};

/// Floating-point sample type usable as combine working precision.
pub trait Pixel:
    Float + bytemuck::Pod + Default + Send + Sync + fmt::Debug + fmt::Display + 'static
{
}

impl Pixel for f32 {}
impl Pixel for f64 {}

/// Convert between sample precisions. Float-to-float casts never fail; NaN is
/// kept as a fallback for exotic `Float` impls.
#[inline]
pub(crate) fn cast_sample<S: Pixel, T: Pixel>(value: S) -> T {
    num_traits::cast(value).unwrap_or_else(T::nan)
}

/// Physical unit attached to a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Unit {
    #[default]
    Dimensionless,
    Named(String),
}

impl Unit {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Dimensionless => write!(f, "dimensionless"),
            Unit::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Bookkeeping written by the combiner on its result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMetadata {
    /// Number of images combined into this frame.
    pub combined_count: Option<usize>,
    /// Method used to combine them.
    pub combine_method: Option<CombineMethod>,
    /// Pixel positions where every input frame was rejected.
    pub all_rejected: usize,
}

/// A calibrated image plus mask, uncertainty and unit.
///
/// The shape is fixed at construction; mask and uncertainty always match it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T = f64> {
    data: Buffer2<T>,
    mask: Buffer2<bool>,
    uncertainty: Option<Buffer2<T>>,
    unit: Unit,
    pub metadata: FrameMetadata,
}

impl<T: Pixel> Frame<T> {
    /// Create a frame with an all-false mask and no uncertainty.
    pub fn new(data: Buffer2<T>, unit: Unit) -> Self {
        let mask = Buffer2::new_default(data.width(), data.height());
        Self {
            data,
            mask,
            uncertainty: None,
            unit,
            metadata: FrameMetadata::default(),
        }
    }

    pub fn from_parts(
        data: Buffer2<T>,
        mask: Option<Buffer2<bool>>,
        uncertainty: Option<Buffer2<T>>,
        unit: Unit,
    ) -> Result<Self, Error> {
        let mut frame = Self::new(data, unit);
        if let Some(mask) = mask {
            frame = frame.with_mask(mask)?;
        }
        if let Some(uncertainty) = uncertainty {
            frame = frame.with_uncertainty(uncertainty)?;
        }
        Ok(frame)
    }

    pub fn with_mask(mut self, mask: Buffer2<bool>) -> Result<Self, Error> {
        check_component("mask", self.shape(), mask.shape())?;
        self.mask = mask;
        Ok(self)
    }

    pub fn with_uncertainty(mut self, uncertainty: Buffer2<T>) -> Result<Self, Error> {
        check_component("uncertainty", self.shape(), uncertainty.shape())?;
        self.uncertainty = Some(uncertainty);
        Ok(self)
    }

    /// Assemble a frame from parts whose shapes are already known to agree.
    pub(crate) fn assemble(
        data: Buffer2<T>,
        mask: Buffer2<bool>,
        uncertainty: Buffer2<T>,
        unit: Unit,
        metadata: FrameMetadata,
    ) -> Self {
        debug_assert_eq!(data.shape(), mask.shape());
        debug_assert_eq!(data.shape(), uncertainty.shape());
        Self {
            data,
            mask,
            uncertainty: Some(uncertainty),
            unit,
            metadata,
        }
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.data.shape()
    }

    #[inline]
    pub fn data(&self) -> &Buffer2<T> {
        &self.data
    }

    /// Mutable access to sample values; the shape cannot change through it.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [T] {
        self.data.pixels_mut()
    }

    #[inline]
    pub fn mask(&self) -> &Buffer2<bool> {
        &self.mask
    }

    #[inline]
    pub fn mask_mut(&mut self) -> &mut [bool] {
        self.mask.pixels_mut()
    }

    #[inline]
    pub fn uncertainty(&self) -> Option<&Buffer2<T>> {
        self.uncertainty.as_ref()
    }

    #[inline]
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Independent copy converted to another sample precision.
    pub fn cast<U: Pixel>(&self) -> Frame<U> {
        Frame {
            data: self.data.map(|&v| cast_sample(v)),
            mask: self.mask.clone(),
            uncertainty: self
                .uncertainty
                .as_ref()
                .map(|u| u.map(|&v| cast_sample(v))),
            unit: self.unit.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

fn check_component(component: &'static str, expected: Shape, actual: Shape) -> Result<(), Error> {
    if expected != actual {
        return Err(Error::ComponentShape {
            component,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Anything the combiner can take as an input frame.
///
/// Full frames carry mask, uncertainty and unit; raw arrays are treated as
/// unmasked, dimensionless data without uncertainty.
pub trait FrameSource {
    fn shape(&self) -> Shape;

    fn unit(&self) -> Unit;

    /// `false` for raw arrays, which limit mask and uncertainty propagation.
    fn is_frame(&self) -> bool;

    fn has_uncertainty(&self) -> bool;

    /// Independent copy at the requested precision.
    fn to_frame<T: Pixel>(&self) -> Frame<T>;
}

impl<S: Pixel> FrameSource for Frame<S> {
    fn shape(&self) -> Shape {
        Frame::shape(self)
    }

    fn unit(&self) -> Unit {
        self.unit.clone()
    }

    fn is_frame(&self) -> bool {
        true
    }

    fn has_uncertainty(&self) -> bool {
        self.uncertainty.is_some()
    }

    fn to_frame<T: Pixel>(&self) -> Frame<T> {
        self.cast()
    }
}

impl<S: Pixel> FrameSource for Buffer2<S> {
    fn shape(&self) -> Shape {
        Buffer2::shape(self)
    }

    fn unit(&self) -> Unit {
        Unit::Dimensionless
    }

    fn is_frame(&self) -> bool {
        false
    }

    fn has_uncertainty(&self) -> bool {
        false
    }

    fn to_frame<T: Pixel>(&self) -> Frame<T> {
        Frame::new(self.map(|&v| cast_sample(v)), Unit::Dimensionless)
    }
}

impl<F: FrameSource + ?Sized> FrameSource for &F {
    fn shape(&self) -> Shape {
        (**self).shape()
    }

    fn unit(&self) -> Unit {
        (**self).unit()
    }

    fn is_frame(&self) -> bool {
        (**self).is_frame()
    }

    fn has_uncertainty(&self) -> bool {
        (**self).has_uncertainty()
    }

    fn to_frame<T: Pixel>(&self) -> Frame<T> {
        (**self).to_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_2x3() -> Buffer2<f64> {
        Buffer2::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])
    }

    #[test]
    fn test_new_frame_defaults() {
        let frame = Frame::new(data_2x3(), Unit::named("adu"));
        assert_eq!(frame.shape(), Shape::new(2, 3));
        assert!(frame.mask().iter().all(|&m| !m));
        assert!(frame.uncertainty().is_none());
        assert_eq!(frame.unit().to_string(), "adu");
        assert_eq!(frame.metadata, FrameMetadata::default());
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let mask = Buffer2::new_default(2, 2);
        let err = Frame::new(data_2x3(), Unit::Dimensionless)
            .with_mask(mask)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ComponentShape {
                component: "mask",
                ..
            }
        ));
    }

    #[test]
    fn test_uncertainty_shape_mismatch() {
        let unct = Buffer2::new_filled(3, 3, 0.1);
        let err = Frame::from_parts(data_2x3(), None, Some(unct), Unit::Dimensionless).unwrap_err();
        assert!(err.to_string().contains("uncertainty"));
    }

    #[test]
    fn test_cast_preserves_components() {
        let mut mask = Buffer2::new_default(3, 2);
        mask[(1, 2)] = true;
        let unct = Buffer2::new_filled(3, 2, 0.5);
        let frame =
            Frame::from_parts(data_2x3(), Some(mask), Some(unct), Unit::named("e-")).unwrap();

        let single: Frame<f32> = frame.cast();
        assert_eq!(single.data()[(1, 1)], 5.0f32);
        assert!(single.mask()[(1, 2)]);
        assert_eq!(single.uncertainty().unwrap()[(0, 0)], 0.5f32);
        assert_eq!(single.unit(), &Unit::named("e-"));
    }

    #[test]
    fn test_raw_array_source() {
        let raw = data_2x3();
        assert!(!raw.is_frame());
        assert!(!raw.has_uncertainty());
        assert_eq!(FrameSource::unit(&raw), Unit::Dimensionless);

        let frame: Frame<f64> = raw.to_frame();
        assert_eq!(frame.data(), &raw);
        assert!(frame.mask().iter().all(|&m| !m));
    }

    #[test]
    fn test_frame_source_through_reference() {
        let frame = Frame::new(data_2x3(), Unit::Dimensionless);
        let refs = [&frame, &frame];
        assert!(refs[0].is_frame());
        assert_eq!(FrameSource::shape(&refs[1]), Shape::new(2, 3));
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(Unit::default().to_string(), "dimensionless");
    }
}
