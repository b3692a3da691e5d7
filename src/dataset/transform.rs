//! Dataset transform versioning
//!
//! Rendered nodes cache the version they last applied, so world matrices are
//! only recomputed for datasets whose transform actually moved.

use crate::core::types::Mat4;

/// Monotonic version counter over a dataset's world matrix.
#[derive(Clone, Debug, Default)]
pub struct TransformTracker {
    version: u64,
    last: Option<Mat4>,
}

impl TransformTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this frame's world matrix.
    ///
    /// Returns true when the matrix differs from the last observed one. The
    /// first observation only establishes the baseline.
    pub fn observe(&mut self, world: &Mat4) -> bool {
        match self.last {
            None => {
                self.last = Some(*world);
                false
            }
            Some(last) if last == *world => false,
            Some(_) => {
                self.version += 1;
                self.last = Some(*world);
                true
            }
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether a node stamped with `applied` must re-apply its matrix
    pub fn is_stale(&self, applied: Option<u64>) -> bool {
        applied != Some(self.version)
    }
}
