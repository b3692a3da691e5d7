//! Visibility-driven node streaming and residency management

pub mod config;
pub mod priority;
pub mod budget;
pub mod cache;
pub mod loader;
pub mod throttle;
pub mod traversal;

pub use config::StreamingConfig;
pub use priority::{QueueEntry, TraversalQueue};
pub use budget::PointBudget;
pub use cache::{DatasetEviction, EvictionTarget, Resident, ResidencyCache};
pub use loader::{
    AsyncNodeLoader, FetchFn, FetchFuture,
    LoadError, LoadRequest, LoadResult, NodeLoader,
};
pub use throttle::StreamingThrottle;
pub use traversal::{traverse, TraversalResult};
