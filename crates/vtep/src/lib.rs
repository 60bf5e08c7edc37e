mod dependency;
mod registry;

pub use dependency::{DependencyQueue, DependentJob};
pub use registry::{DeviceData, DeviceInfo, RowClass, Status, DEFAULT_IN_TRANSIT_EXPIRY};
