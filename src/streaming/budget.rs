//! Visible point budget for one traversal
//!
//! Tracks the running number of admitted points globally and per dataset, and
//! answers whether another node still fits.

/// Frame-local point accounting
///
/// Datasets are addressed by their index in the frame's dataset slice.
#[derive(Clone, Debug)]
pub struct PointBudget {
    /// Maximum visible points across all datasets
    global_budget: u64,
    /// Points admitted so far this frame
    global_used: u64,
    /// Per-dataset maximums
    dataset_budgets: Vec<u64>,
    /// Per-dataset admitted points
    dataset_used: Vec<u64>,
}

impl PointBudget {
    /// Create a budget for one frame
    ///
    /// # Arguments
    /// * `global_budget` - Maximum visible points overall
    /// * `dataset_budgets` - Maximum visible points of each dataset
    pub fn new(global_budget: u64, dataset_budgets: Vec<u64>) -> Self {
        let dataset_used = vec![0; dataset_budgets.len()];
        Self {
            global_budget,
            global_used: 0,
            dataset_budgets,
            dataset_used,
        }
    }

    // --- Query methods ---

    pub fn global_used(&self) -> u64 {
        self.global_used
    }

    /// Points admitted for one dataset
    pub fn dataset_used(&self, dataset: usize) -> u64 {
        self.dataset_used.get(dataset).copied().unwrap_or(0)
    }

    // --- Decision methods ---

    /// True when `points` more would overflow the global budget
    ///
    /// Traversal stops entirely at the first node for which this holds.
    pub fn exceeds_global(&self, points: u64) -> bool {
        self.global_used
            .checked_add(points)
            .map_or(true, |total| total > self.global_budget)
    }

    /// True when `points` fit in both the global and the dataset budget
    pub fn fits(&self, dataset: usize, points: u64) -> bool {
        let dataset_budget = self.dataset_budgets.get(dataset).copied().unwrap_or(u64::MAX);
        let within_dataset = self
            .dataset_used(dataset)
            .checked_add(points)
            .is_some_and(|total| total <= dataset_budget);
        !self.exceeds_global(points) && within_dataset
    }

    // --- Tracking methods ---

    /// Count an admitted node
    pub fn admit(&mut self, dataset: usize, points: u64) {
        self.global_used = self.global_used.saturating_add(points);
        if let Some(used) = self.dataset_used.get_mut(dataset) {
            *used = used.saturating_add(points);
        }
    }
}
