//! Windowed rendering: O(visible) materialization over an unbounded list.

mod fenwick;
mod measure;
mod window;

pub use fenwick::FenwickTree;
pub use measure::{RowMeasurements, MIN_ROW_PX};
pub use window::{ListWindow, MountPlan};
