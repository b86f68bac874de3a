mod activator;

pub use activator::{ActivationCounts, Activator};
