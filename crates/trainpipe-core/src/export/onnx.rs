//! ONNX protobuf messages.
//!
//! Hand-declared `prost` messages covering every field of `onnx.proto`
//! (proto2, IR version 11). Messages that graph surgery never edits
//! (functions, training info, sparse tensors, non-tensor types, device
//! configurations, tensor segments) are kept as their encoded bytes, so they
//! survive a decode/encode cycle unchanged. [`decode_model`] rejects input
//! carrying fields outside this set instead of silently dropping them.

use crate::error::IoResultExt;
use crate::{Result, TrainpipeError};
use prost::Message;
use std::path::Path;

/// `TensorProto.DataType` values.
pub mod data_type {
    pub const FLOAT: i32 = 1;
    pub const INT32: i32 = 6;
    pub const INT64: i32 = 7;
    pub const FLOAT16: i32 = 10;
}

/// `AttributeProto.AttributeType` values.
pub mod attribute_type {
    pub const FLOAT: i32 = 1;
    pub const INT: i32 = 2;
    pub const STRING: i32 = 3;
    pub const TENSOR: i32 = 4;
    pub const GRAPH: i32 = 5;
    pub const FLOATS: i32 = 6;
    pub const INTS: i32 = 7;
    pub const STRINGS: i32 = 8;
}

#[derive(Clone, PartialEq, Message)]
pub struct ModelProto {
    #[prost(int64, optional, tag = "1")]
    pub ir_version: Option<i64>,
    #[prost(string, optional, tag = "2")]
    pub producer_name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub producer_version: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub domain: Option<String>,
    #[prost(int64, optional, tag = "5")]
    pub model_version: Option<i64>,
    #[prost(string, optional, tag = "6")]
    pub doc_string: Option<String>,
    #[prost(message, optional, tag = "7")]
    pub graph: Option<GraphProto>,
    #[prost(message, repeated, tag = "8")]
    pub opset_import: Vec<OperatorSetIdProto>,
    #[prost(message, repeated, tag = "14")]
    pub metadata_props: Vec<StringStringEntryProto>,
    /// Encoded `TrainingInfoProto` entries.
    #[prost(bytes = "vec", repeated, tag = "20")]
    pub training_info: Vec<Vec<u8>>,
    /// Encoded `FunctionProto` entries.
    #[prost(bytes = "vec", repeated, tag = "25")]
    pub functions: Vec<Vec<u8>>,
    /// Encoded `DeviceConfigurationProto` entries.
    #[prost(bytes = "vec", repeated, tag = "26")]
    pub configuration: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OperatorSetIdProto {
    #[prost(string, optional, tag = "1")]
    pub domain: Option<String>,
    #[prost(int64, optional, tag = "2")]
    pub version: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StringStringEntryProto {
    #[prost(string, optional, tag = "1")]
    pub key: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GraphProto {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeProto>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub initializer: Vec<TensorProto>,
    #[prost(string, optional, tag = "10")]
    pub doc_string: Option<String>,
    #[prost(message, repeated, tag = "11")]
    pub input: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "12")]
    pub output: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "13")]
    pub value_info: Vec<ValueInfoProto>,
    /// Encoded `TensorAnnotation` entries.
    #[prost(bytes = "vec", repeated, tag = "14")]
    pub quantization_annotation: Vec<Vec<u8>>,
    /// Encoded `SparseTensorProto` entries.
    #[prost(bytes = "vec", repeated, tag = "15")]
    pub sparse_initializer: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "16")]
    pub metadata_props: Vec<StringStringEntryProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NodeProto {
    #[prost(string, repeated, tag = "1")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub output: Vec<String>,
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub op_type: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub attribute: Vec<AttributeProto>,
    #[prost(string, optional, tag = "6")]
    pub doc_string: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub domain: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub overload: Option<String>,
    #[prost(message, repeated, tag = "9")]
    pub metadata_props: Vec<StringStringEntryProto>,
    /// Encoded `NodeDeviceConfigurationProto` entries.
    #[prost(bytes = "vec", repeated, tag = "10")]
    pub device_configurations: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AttributeProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub f: Option<f32>,
    #[prost(int64, optional, tag = "3")]
    pub i: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub s: Option<Vec<u8>>,
    #[prost(message, optional, tag = "5")]
    pub t: Option<TensorProto>,
    #[prost(message, optional, boxed, tag = "6")]
    pub g: Option<Box<GraphProto>>,
    #[prost(float, repeated, packed = "false", tag = "7")]
    pub floats: Vec<f32>,
    #[prost(int64, repeated, packed = "false", tag = "8")]
    pub ints: Vec<i64>,
    #[prost(bytes = "vec", repeated, tag = "9")]
    pub strings: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "10")]
    pub tensors: Vec<TensorProto>,
    #[prost(message, repeated, tag = "11")]
    pub graphs: Vec<GraphProto>,
    #[prost(string, optional, tag = "13")]
    pub doc_string: Option<String>,
    /// Encoded `TypeProto`.
    #[prost(bytes = "vec", optional, tag = "14")]
    pub tp: Option<Vec<u8>>,
    /// Encoded `TypeProto` entries.
    #[prost(bytes = "vec", repeated, tag = "15")]
    pub type_protos: Vec<Vec<u8>>,
    #[prost(int32, optional, tag = "20")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "21")]
    pub ref_attr_name: Option<String>,
    /// Encoded `SparseTensorProto`.
    #[prost(bytes = "vec", optional, tag = "22")]
    pub sparse_tensor: Option<Vec<u8>>,
    /// Encoded `SparseTensorProto` entries.
    #[prost(bytes = "vec", repeated, tag = "23")]
    pub sparse_tensors: Vec<Vec<u8>>,
}

impl AttributeProto {
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            s: Some(value.as_bytes().to_vec()),
            r#type: Some(attribute_type::STRING),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorProto {
    #[prost(int64, repeated, packed = "false", tag = "1")]
    pub dims: Vec<i64>,
    #[prost(int32, optional, tag = "2")]
    pub data_type: Option<i32>,
    /// Encoded `TensorProto.Segment`.
    #[prost(bytes = "vec", optional, tag = "3")]
    pub segment: Option<Vec<u8>>,
    #[prost(float, repeated, tag = "4")]
    pub float_data: Vec<f32>,
    #[prost(int32, repeated, tag = "5")]
    pub int32_data: Vec<i32>,
    #[prost(bytes = "vec", repeated, tag = "6")]
    pub string_data: Vec<Vec<u8>>,
    #[prost(int64, repeated, tag = "7")]
    pub int64_data: Vec<i64>,
    #[prost(string, optional, tag = "8")]
    pub name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub raw_data: Option<Vec<u8>>,
    #[prost(double, repeated, tag = "10")]
    pub double_data: Vec<f64>,
    #[prost(uint64, repeated, tag = "11")]
    pub uint64_data: Vec<u64>,
    #[prost(string, optional, tag = "12")]
    pub doc_string: Option<String>,
    #[prost(message, repeated, tag = "13")]
    pub external_data: Vec<StringStringEntryProto>,
    #[prost(int32, optional, tag = "14")]
    pub data_location: Option<i32>,
    #[prost(message, repeated, tag = "16")]
    pub metadata_props: Vec<StringStringEntryProto>,
}

impl TensorProto {
    pub fn float(name: &str, dims: Vec<i64>, values: Vec<f32>) -> Self {
        Self {
            name: Some(name.to_string()),
            dims,
            data_type: Some(data_type::FLOAT),
            float_data: values,
            ..Default::default()
        }
    }

    pub fn int64(name: &str, dims: Vec<i64>, values: Vec<i64>) -> Self {
        Self {
            name: Some(name.to_string()),
            dims,
            data_type: Some(data_type::INT64),
            int64_data: values,
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ValueInfoProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub r#type: Option<TypeProto>,
    #[prost(string, optional, tag = "3")]
    pub doc_string: Option<String>,
    #[prost(message, repeated, tag = "4")]
    pub metadata_props: Vec<StringStringEntryProto>,
}

impl ValueInfoProto {
    /// A tensor value with a fully static shape.
    pub fn tensor(name: &str, elem_type: i32, dims: &[i64]) -> Self {
        Self {
            name: Some(name.to_string()),
            r#type: Some(TypeProto {
                value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                    elem_type: Some(elem_type),
                    shape: Some(TensorShapeProto {
                        dim: dims
                            .iter()
                            .map(|d| tensor_shape_proto::Dimension {
                                value: Some(tensor_shape_proto::dimension::Value::DimValue(*d)),
                                denotation: None,
                            })
                            .collect(),
                    }),
                })),
                denotation: None,
            }),
            ..Default::default()
        }
    }

    pub fn tensor_type(&self) -> Option<&type_proto::Tensor> {
        match self.r#type.as_ref()?.value.as_ref()? {
            type_proto::Value::TensorType(t) => Some(t),
            _ => None,
        }
    }

    /// Dimensions with `None` for symbolic or unknown entries.
    pub fn static_dims(&self) -> Option<Vec<Option<i64>>> {
        let shape = self.tensor_type()?.shape.as_ref()?;
        Some(
            shape
                .dim
                .iter()
                .map(|d| match d.value {
                    Some(tensor_shape_proto::dimension::Value::DimValue(v)) => Some(v),
                    _ => None,
                })
                .collect(),
        )
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TypeProto {
    #[prost(oneof = "type_proto::Value", tags = "1, 4, 5, 7, 8, 9")]
    pub value: Option<type_proto::Value>,
    #[prost(string, optional, tag = "6")]
    pub denotation: Option<String>,
}

pub mod type_proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Tensor {
        #[prost(int32, optional, tag = "1")]
        pub elem_type: Option<i32>,
        #[prost(message, optional, tag = "2")]
        pub shape: Option<super::TensorShapeProto>,
    }

    /// Only tensor types are decoded; the others keep their encoded bytes.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "1")]
        TensorType(Tensor),
        #[prost(bytes, tag = "4")]
        SequenceType(Vec<u8>),
        #[prost(bytes, tag = "5")]
        MapType(Vec<u8>),
        #[prost(bytes, tag = "7")]
        OpaqueType(Vec<u8>),
        #[prost(bytes, tag = "8")]
        SparseTensorType(Vec<u8>),
        #[prost(bytes, tag = "9")]
        OptionalType(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "1")]
    pub dim: Vec<tensor_shape_proto::Dimension>,
}

pub mod tensor_shape_proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Dimension {
        #[prost(oneof = "dimension::Value", tags = "1, 2")]
        pub value: Option<dimension::Value>,
        #[prost(string, optional, tag = "3")]
        pub denotation: Option<String>,
    }

    pub mod dimension {
        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Value {
            #[prost(int64, tag = "1")]
            DimValue(i64),
            #[prost(string, tag = "2")]
            DimParam(String),
        }
    }
}

impl ModelProto {
    /// Opset version of the default (`""` / `ai.onnx`) domain.
    pub fn default_opset(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|o| matches!(o.domain.as_deref(), None | Some("") | Some("ai.onnx")))
            .and_then(|o| o.version)
    }
}

/// Decode a serialized model.
///
/// Fails when the bytes carry anything the declared messages cannot
/// re-encode (fields from a newer IR version), since saving the model again
/// would lose them.
pub fn decode_model(bytes: &[u8]) -> Result<ModelProto> {
    let model = ModelProto::decode(bytes).map_err(|e| TrainpipeError::Export {
        message: format!("not a valid ONNX model: {e}"),
    })?;
    let retained = model.encoded_len();
    if retained != bytes.len() {
        return Err(TrainpipeError::Export {
            message: format!(
                "ONNX model uses fields this exporter cannot preserve ({} of {} bytes understood)",
                retained,
                bytes.len()
            ),
        });
    }
    Ok(model)
}

pub fn encode_model(model: &ModelProto) -> Vec<u8> {
    model.encode_to_vec()
}

pub async fn load_model(path: &Path) -> Result<ModelProto> {
    let bytes = tokio::fs::read(path).await.with_path(path)?;
    decode_model(&bytes)
}

pub async fn save_model(model: &ModelProto, path: &Path) -> Result<()> {
    tokio::fs::write(path, encode_model(model))
        .await
        .with_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_dims_reports_symbolic() {
        let mut input = ValueInfoProto::tensor("images", data_type::FLOAT, &[1, 3, 640, 640]);
        assert_eq!(
            input.static_dims().unwrap(),
            vec![Some(1), Some(3), Some(640), Some(640)]
        );

        if let Some(type_proto::Value::TensorType(t)) =
            input.r#type.as_mut().and_then(|t| t.value.as_mut())
        {
            t.shape.as_mut().unwrap().dim[0].value = Some(
                tensor_shape_proto::dimension::Value::DimParam("batch".into()),
            );
        }
        assert_eq!(input.static_dims().unwrap()[0], None);
    }

    #[test]
    fn test_model_bytes_roundtrip() {
        let model = ModelProto {
            ir_version: Some(8),
            opset_import: vec![OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(17),
            }],
            graph: Some(GraphProto {
                name: Some("g".into()),
                input: vec![ValueInfoProto::tensor("x", data_type::FLOAT, &[1, 3, 32, 32])],
                ..Default::default()
            }),
            ..Default::default()
        };

        let decoded = decode_model(&encode_model(&model)).unwrap();
        assert_eq!(decoded, model);
        assert_eq!(decoded.default_opset(), Some(17));
    }

    #[test]
    fn test_garbage_is_export_error() {
        assert!(matches!(
            decode_model(b"\xff\xff\xff"),
            Err(TrainpipeError::Export { .. })
        ));
    }

    /// Appends a length-delimited field `tag` carrying `payload`.
    fn append_field(bytes: &mut Vec<u8>, tag: u32, payload: &[u8]) {
        prost::encoding::encode_key(
            tag,
            prost::encoding::WireType::LengthDelimited,
            bytes,
        );
        prost::encoding::encode_varint(payload.len() as u64, bytes);
        bytes.extend_from_slice(payload);
    }

    fn minimal_model() -> ModelProto {
        ModelProto {
            ir_version: Some(8),
            graph: Some(GraphProto {
                input: vec![ValueInfoProto::tensor("x", data_type::FLOAT, &[1, 3, 32, 32])],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_functions_survive_roundtrip() {
        // FunctionProto { name: "f" }
        let function = [0x0a, 0x01, b'f'];
        let mut bytes = encode_model(&minimal_model());
        append_field(&mut bytes, 25, &function);

        let decoded = decode_model(&bytes).unwrap();
        assert_eq!(decoded.functions, vec![function.to_vec()]);
        assert_eq!(encode_model(&decoded), bytes);
    }

    #[test]
    fn test_non_tensor_types_are_kept() {
        let mut value = ValueInfoProto::tensor("seq", data_type::FLOAT, &[1]);
        value.r#type.as_mut().unwrap().value =
            Some(type_proto::Value::SequenceType(vec![0x0a, 0x00]));
        let mut model = minimal_model();
        model.graph.as_mut().unwrap().output.push(value.clone());

        let decoded = decode_model(&encode_model(&model)).unwrap();
        assert_eq!(decoded.graph.unwrap().output[0], value);
        assert!(value.tensor_type().is_none());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let mut bytes = encode_model(&minimal_model());
        append_field(&mut bytes, 99, b"future");

        assert!(matches!(
            decode_model(&bytes),
            Err(TrainpipeError::Export { .. })
        ));
    }
}
