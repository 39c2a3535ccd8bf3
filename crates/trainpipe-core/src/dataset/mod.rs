//! Dataset preparation: annotated tasks → YOLO directory layout.

mod builder;
mod converter;

pub use builder::{val_count, validate_val_split, DatasetBuilder, PreparedDataset};
pub use converter::{AnnotationConverter, NativeYoloConverter};
