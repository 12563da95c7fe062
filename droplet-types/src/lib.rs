//! Count matrix types shared by the droplet-rs crates

pub mod matrix;

pub use matrix::{FeatureBarcodeMatrix, GenericFeatureBarcodeMatrix};
