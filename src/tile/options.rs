//! Enhancement options: which operations to run and how to report them.
//!
//! Operations form a closed set. [`OperationSet`] stores them as a bitset so
//! two sets built in different orders are identical values, and iteration
//! always follows the pipeline order (SuperRes, Denoise, Segment, Classify).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

/// Default minimum confidence for a feature to be reported.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

// =============================================================================
// Operation Kind
// =============================================================================

/// One enhancement or analysis operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(rename = "sr", alias = "super_res")]
    SuperRes,
    #[serde(rename = "denoise")]
    Denoise,
    #[serde(rename = "segment")]
    Segment,
    #[serde(rename = "classify")]
    Classify,
}

impl OperationKind {
    /// All kinds in pipeline order.
    pub const ALL: [OperationKind; 4] = [
        OperationKind::SuperRes,
        OperationKind::Denoise,
        OperationKind::Segment,
        OperationKind::Classify,
    ];

    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::SuperRes => "sr",
            OperationKind::Denoise => "denoise",
            OperationKind::Segment => "segment",
            OperationKind::Classify => "classify",
        }
    }

    /// Whether the operation produces a new pixel buffer.
    ///
    /// Segment and Classify only detect features; their output reaches the
    /// final image through overlays.
    pub fn transforms_image(self) -> bool {
        matches!(self, OperationKind::SuperRes | OperationKind::Denoise)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sr" | "super_res" | "superres" => Ok(OperationKind::SuperRes),
            "denoise" => Ok(OperationKind::Denoise),
            "segment" | "segmentation" => Ok(OperationKind::Segment),
            "classify" | "classification" => Ok(OperationKind::Classify),
            other => Err(OptionsError::UnknownOperation(other.to_string())),
        }
    }
}

// =============================================================================
// Operation Set
// =============================================================================

/// An order-independent set of operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<OperationKind>", from = "Vec<OperationKind>")]
pub struct OperationSet(u8);

impl OperationSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every operation.
    pub fn all() -> Self {
        OperationKind::ALL.into_iter().collect()
    }

    /// Add an operation.
    pub fn insert(&mut self, kind: OperationKind) {
        self.0 |= kind.bit();
    }

    /// Builder-style insert.
    pub fn with(mut self, kind: OperationKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = OperationKind> + '_ {
        OperationKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    /// Parse a comma-separated list such as `"sr,denoise"`.
    pub fn parse_list(list: &str) -> Result<Self, OptionsError> {
        list.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(OperationKind::from_str)
            .collect()
    }
}

impl FromIterator<OperationKind> for OperationSet {
    fn from_iter<I: IntoIterator<Item = OperationKind>>(iter: I) -> Self {
        let mut set = OperationSet::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl From<Vec<OperationKind>> for OperationSet {
    fn from(kinds: Vec<OperationKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<OperationSet> for Vec<OperationKind> {
    fn from(set: OperationSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(OperationKind::as_str).collect();
        f.write_str(&names.join("+"))
    }
}

// =============================================================================
// Enhancement Options
// =============================================================================

/// What work to perform on a tile. Also determines the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOptions")]
pub struct EnhancementOptions {
    operations: OperationSet,
    confidence_threshold: f32,
    overlay_labels: bool,
}

#[derive(Deserialize)]
struct RawOptions {
    #[serde(default)]
    operations: OperationSet,
    #[serde(default = "default_threshold")]
    confidence_threshold: f32,
    #[serde(default)]
    overlay_labels: bool,
}

fn default_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

impl TryFrom<RawOptions> for EnhancementOptions {
    type Error = OptionsError;

    fn try_from(raw: RawOptions) -> Result<Self, Self::Error> {
        EnhancementOptions::new(raw.operations, raw.confidence_threshold, raw.overlay_labels)
    }
}

impl EnhancementOptions {
    /// Create validated options.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::InvalidThreshold`] if the threshold is NaN or
    /// outside `[0, 1]`.
    pub fn new(
        operations: OperationSet,
        confidence_threshold: f32,
        overlay_labels: bool,
    ) -> Result<Self, OptionsError> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(OptionsError::InvalidThreshold(confidence_threshold));
        }
        Ok(Self {
            operations,
            // Fold -0.0 into 0.0 so equal thresholds share a cache key
            confidence_threshold: confidence_threshold + 0.0,
            overlay_labels,
        })
    }

    /// Options running the given operations with default threshold and no overlay.
    pub fn with_operations(operations: OperationSet) -> Self {
        Self {
            operations,
            ..Self::default()
        }
    }

    pub fn operations(&self) -> OperationSet {
        self.operations
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn overlay_labels(&self) -> bool {
        self.overlay_labels
    }

    /// Threshold bit pattern used for hashing.
    pub(crate) fn threshold_bits(&self) -> u32 {
        self.confidence_threshold.to_bits()
    }
}

impl Default for EnhancementOptions {
    fn default() -> Self {
        Self {
            operations: OperationSet::empty(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            overlay_labels: false,
        }
    }
}
