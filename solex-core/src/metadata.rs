//! Per-image metadata registry.
//!
//! Auxiliary facts travel with a frame buffer through the pipeline, keyed by a
//! small closed set of tags. Values are reference counted: cloning a
//! [`Metadata`] is a shallow copy, and writing an entry only replaces that
//! entry in the writer's own copy, so stages that fan out from one buffer never
//! observe each other's rewrites.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use solex_math::{Ellipse, PixelTransform};

/// Keys of the metadata registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataTag {
    Ellipse,
    RedshiftAreas,
    TransformHistory,
    PixelShift,
}

/// Tagged storage for every metadata kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Ellipse(Ellipse),
    RedshiftAreas(RedshiftAreas),
    TransformHistory(TransformHistory),
    PixelShift(PixelShift),
}

/// Types that can be stored in a [`Metadata`] registry.
pub trait MetadataItem: Clone + Send + Sync + 'static {
    const TAG: MetadataTag;

    fn into_value(self) -> MetadataValue;

    fn from_value(value: &MetadataValue) -> Option<&Self>;
}

macro_rules! metadata_item {
    ($ty:ty, $variant:ident) => {
        impl MetadataItem for $ty {
            const TAG: MetadataTag = MetadataTag::$variant;

            fn into_value(self) -> MetadataValue {
                MetadataValue::$variant(self)
            }

            fn from_value(value: &MetadataValue) -> Option<&Self> {
                match value {
                    MetadataValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

metadata_item!(Ellipse, Ellipse);
metadata_item!(RedshiftAreas, RedshiftAreas);
metadata_item!(TransformHistory, TransformHistory);
metadata_item!(PixelShift, PixelShift);

/// Pixel shift from the spectral line core at which a frame was reconstructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelShift(pub f64);

/// A rectangular region where a Doppler redshift was measured.
#[derive(Debug, Clone, PartialEq)]
pub struct RedshiftArea {
    pub id: String,
    pub pixel_shift: f64,
    /// Line-of-sight velocity in km/s
    pub relative_speed: f64,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl RedshiftArea {
    /// Same area with both corners moved through `transform`.
    pub fn transformed(&self, transform: &PixelTransform) -> RedshiftArea {
        let (ax, ay) = transform.apply_xy(self.x1 as f64, self.y1 as f64);
        let (bx, by) = transform.apply_xy(self.x2 as f64, self.y2 as f64);
        RedshiftArea {
            id: self.id.clone(),
            pixel_shift: self.pixel_shift,
            relative_speed: self.relative_speed,
            x1: ax.min(bx).round() as i32,
            y1: ay.min(by).round() as i32,
            x2: ax.max(bx).round() as i32,
            y2: ay.max(by).round() as i32,
        }
    }
}

/// All redshift areas detected on an image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RedshiftAreas(pub Vec<RedshiftArea>);

impl RedshiftAreas {
    pub fn transformed(&self, transform: &PixelTransform) -> RedshiftAreas {
        RedshiftAreas(self.0.iter().map(|a| a.transformed(transform)).collect())
    }
}

/// Ordered list of the operations applied to an image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformHistory(pub Vec<String>);

impl TransformHistory {
    pub fn with_step(&self, step: impl Into<String>) -> TransformHistory {
        let mut steps = self.0.clone();
        steps.push(step.into());
        TransformHistory(steps)
    }
}

/// Heterogeneous metadata map keyed by [`MetadataTag`].
#[derive(Clone, Default, PartialEq)]
pub struct Metadata {
    entries: BTreeMap<MetadataTag, Arc<MetadataValue>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: MetadataItem>(&self) -> Option<&T> {
        self.entries
            .get(&T::TAG)
            .and_then(|value| T::from_value(value))
    }

    pub fn contains<T: MetadataItem>(&self) -> bool {
        self.entries.contains_key(&T::TAG)
    }

    /// Insert or replace the entry for `T`. Other copies keep their value.
    pub fn insert<T: MetadataItem>(&mut self, item: T) {
        self.entries.insert(T::TAG, Arc::new(item.into_value()));
    }

    pub fn remove<T: MetadataItem>(&mut self) -> Option<T> {
        self.entries
            .remove(&T::TAG)
            .and_then(|value| T::from_value(&value).cloned())
    }

    pub fn with<T: MetadataItem>(mut self, item: T) -> Self {
        self.insert(item);
        self
    }

    /// Appends a step to the transform history.
    pub fn record_step(&mut self, step: impl Into<String>) {
        let history = self
            .get::<TransformHistory>()
            .cloned()
            .unwrap_or_default()
            .with_step(step);
        self.insert(history);
    }

    /// Copy with every coordinate-bearing entry moved through `transform`.
    ///
    /// The ellipse entry is dropped when it cannot be refitted after the
    /// transform; callers that know a better ellipse insert it afterwards.
    pub fn remapped(&self, transform: &PixelTransform) -> Metadata {
        let mut copy = self.remapped_areas(transform);
        if let Some(ellipse) = self.get::<Ellipse>() {
            match transform.apply_to_ellipse(ellipse) {
                Ok(mapped) => copy.insert(mapped),
                Err(e) => {
                    log::debug!("Dropping ellipse metadata after transform: {e}");
                    copy.remove::<Ellipse>();
                }
            }
        }
        copy
    }

    /// Same as [`Metadata::remapped`] for a caller that already mapped the
    /// ellipse, which is stored as given instead of being refitted.
    pub fn remapped_with_ellipse(&self, transform: &PixelTransform, ellipse: Ellipse) -> Metadata {
        let mut copy = self.remapped_areas(transform);
        copy.insert(ellipse);
        copy
    }

    fn remapped_areas(&self, transform: &PixelTransform) -> Metadata {
        let mut copy = self.clone();
        if let Some(areas) = self.get::<RedshiftAreas>() {
            copy.insert(areas.transformed(transform));
        }
        copy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v.as_ref())))
            .finish()
    }
}
