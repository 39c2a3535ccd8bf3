//! Graph export: trained checkpoint → ONNX (optionally resized) → `.blob`,
//! and uploaded TF.js heads composed onto a base model.

mod exporter;
pub mod onnx;
pub(crate) mod surgery;
mod upload;

pub use exporter::{
    BlobCompiler, CheckpointExporter, GraphExporter, ScriptBlobCompiler, ScriptCheckpointExporter,
};
pub use surgery::{
    add_input_resize, RESIZED_INPUT, RESIZED_OUTPUT, RESIZE_ROI, RESIZE_SCALES, RESIZE_SHAPE,
};
pub use upload::{
    validate_input_shape, ModelUpload, ScriptUploadConverter, UploadConverter, UploadSources,
};
