//! Input-resolution surgery on an exported detection graph.
//!
//! The graph is exported at the canonical resolution. To accept a different
//! input size, a new input of the requested size feeds a `Resize` node that
//! scales back to the original size before the first original operation.

use super::onnx::{data_type, AttributeProto, ModelProto, NodeProto, TensorProto, ValueInfoProto};
use crate::resolution::Resolution;
use crate::{Result, TrainpipeError};
use std::collections::HashSet;

pub const RESIZED_INPUT: &str = "resized_input";
pub const RESIZED_OUTPUT: &str = "resized_output";
pub const RESIZE_ROI: &str = "resize_roi";
pub const RESIZE_SCALES: &str = "resize_scales";
pub const RESIZE_SHAPE: &str = "resize_shape";

/// `Resize` with a `sizes` input needs opset 11.
const MIN_RESIZE_OPSET: i64 = 11;

/// Replace the single graph input with `resized_input: float[1,3,H,W]` and
/// resize it back to the original spatial size.
///
/// Every node, initializer and output not touched by the rewiring is carried
/// over unchanged.
pub fn add_input_resize(model: &ModelProto, target: Resolution) -> Result<ModelProto> {
    let graph = model.graph.as_ref().ok_or_else(|| export_err("model has no graph"))?;

    if let Some(opset) = model.default_opset() {
        if opset < MIN_RESIZE_OPSET {
            return Err(export_err(format!(
                "opset {opset} is too old for Resize with sizes (need {MIN_RESIZE_OPSET})"
            )));
        }
    }

    let initializer_names: HashSet<&str> = graph
        .initializer
        .iter()
        .filter_map(|t| t.name.as_deref())
        .collect();
    let runtime_inputs: Vec<usize> = graph
        .input
        .iter()
        .enumerate()
        .filter(|(_, vi)| {
            vi.name
                .as_deref()
                .is_some_and(|n| !initializer_names.contains(n))
        })
        .map(|(i, _)| i)
        .collect();
    let &[input_index] = runtime_inputs.as_slice() else {
        return Err(export_err(format!(
            "expected exactly one graph input, found {}",
            runtime_inputs.len()
        )));
    };

    let original = &graph.input[input_index];
    let original_name = original.name.clone().unwrap_or_default();
    let dims = original
        .static_dims()
        .ok_or_else(|| export_err(format!("input {original_name} has no tensor shape")))?;
    if dims.len() != 4 {
        return Err(export_err(format!(
            "input {original_name} has rank {}, expected NCHW",
            dims.len()
        )));
    }
    let (Some(orig_h), Some(orig_w)) = (dims[2], dims[3]) else {
        return Err(export_err(format!(
            "input {original_name} has symbolic spatial dimensions"
        )));
    };

    check_name_collisions(model)?;

    let mut out = model.clone();
    let graph = out
        .graph
        .as_mut()
        .ok_or_else(|| export_err("model has no graph"))?;

    graph.input[input_index] = ValueInfoProto::tensor(
        RESIZED_INPUT,
        data_type::FLOAT,
        &[1, 3, i64::from(target.height), i64::from(target.width)],
    );

    graph.initializer.push(TensorProto::int64(
        RESIZE_SHAPE,
        vec![4],
        vec![1, 3, orig_h, orig_w],
    ));
    graph
        .initializer
        .push(TensorProto::float(RESIZE_ROI, vec![0], Vec::new()));
    graph
        .initializer
        .push(TensorProto::float(RESIZE_SCALES, vec![0], Vec::new()));

    for node in &mut graph.node {
        for input in &mut node.input {
            if *input == original_name {
                *input = RESIZED_OUTPUT.to_string();
            }
        }
    }

    graph.node.insert(0, resize_node());
    Ok(out)
}

fn resize_node() -> NodeProto {
    NodeProto {
        input: vec![
            RESIZED_INPUT.to_string(),
            RESIZE_ROI.to_string(),
            RESIZE_SCALES.to_string(),
            RESIZE_SHAPE.to_string(),
        ],
        output: vec![RESIZED_OUTPUT.to_string()],
        op_type: Some("Resize".to_string()),
        attribute: vec![
            AttributeProto::string("coordinate_transformation_mode", "half_pixel"),
            AttributeProto::string("mode", "linear"),
        ],
        ..Default::default()
    }
}

/// The names surgery introduces must be free in the graph.
fn check_name_collisions(model: &ModelProto) -> Result<()> {
    let Some(graph) = model.graph.as_ref() else {
        return Ok(());
    };

    let mut used: HashSet<&str> = HashSet::new();
    for node in &graph.node {
        used.extend(node.input.iter().map(String::as_str));
        used.extend(node.output.iter().map(String::as_str));
        if let Some(name) = node.name.as_deref() {
            used.insert(name);
        }
    }
    used.extend(graph.initializer.iter().filter_map(|t| t.name.as_deref()));
    for vi in graph
        .input
        .iter()
        .chain(&graph.output)
        .chain(&graph.value_info)
    {
        if let Some(name) = vi.name.as_deref() {
            used.insert(name);
        }
    }

    for name in [
        RESIZED_INPUT,
        RESIZED_OUTPUT,
        RESIZE_ROI,
        RESIZE_SCALES,
        RESIZE_SHAPE,
    ] {
        if used.contains(name) {
            return Err(export_err(format!("graph already uses the name {name}")));
        }
    }
    Ok(())
}

fn export_err(message: impl Into<String>) -> TrainpipeError {
    TrainpipeError::Export {
        message: message.into(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::export::onnx::{decode_model, encode_model, GraphProto, OperatorSetIdProto};

    /// Small stand-in for a detection export: Conv → Sigmoid over `images`.
    pub(crate) fn detection_model() -> ModelProto {
        let conv = NodeProto {
            input: vec!["images".into(), "conv.weight".into()],
            output: vec!["conv_out".into()],
            name: Some("/model.0/conv/Conv".into()),
            op_type: Some("Conv".into()),
            ..Default::default()
        };
        let act = NodeProto {
            input: vec!["conv_out".into()],
            output: vec!["output0".into()],
            name: Some("/model.0/act/Sigmoid".into()),
            op_type: Some("Sigmoid".into()),
            ..Default::default()
        };
        ModelProto {
            ir_version: Some(8),
            producer_name: Some("pytorch".into()),
            opset_import: vec![OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(17),
            }],
            graph: Some(GraphProto {
                name: Some("main_graph".into()),
                node: vec![conv, act],
                initializer: vec![TensorProto::float("conv.weight", vec![1], vec![0.5])],
                input: vec![ValueInfoProto::tensor(
                    "images",
                    data_type::FLOAT,
                    &[1, 3, 640, 640],
                )],
                output: vec![ValueInfoProto::tensor(
                    "output0",
                    data_type::FLOAT,
                    &[1, 3, 640, 640],
                )],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn resolution(h: u32, w: u32) -> Resolution {
        Resolution::new(h, w).unwrap()
    }

    #[test]
    fn test_input_shape_is_requested_resolution() {
        let out = add_input_resize(&detection_model(), resolution(320, 480)).unwrap();
        let graph = out.graph.unwrap();

        assert_eq!(graph.input.len(), 1);
        assert_eq!(graph.input[0].name.as_deref(), Some(RESIZED_INPUT));
        assert_eq!(
            graph.input[0].static_dims().unwrap(),
            vec![Some(1), Some(3), Some(320), Some(480)]
        );
    }

    #[test]
    fn test_resize_node_and_initializers() {
        let out = add_input_resize(&detection_model(), resolution(320, 320)).unwrap();
        let graph = out.graph.unwrap();

        let resize = &graph.node[0];
        assert_eq!(resize.op_type.as_deref(), Some("Resize"));
        assert_eq!(
            resize.input,
            vec![RESIZED_INPUT, RESIZE_ROI, RESIZE_SCALES, RESIZE_SHAPE]
        );
        assert_eq!(resize.output, vec![RESIZED_OUTPUT]);
        let attr = |n: &str| {
            resize
                .attribute
                .iter()
                .find(|a| a.name.as_deref() == Some(n))
                .and_then(|a| a.s.clone())
        };
        assert_eq!(attr("mode").unwrap(), b"linear");
        assert_eq!(attr("coordinate_transformation_mode").unwrap(), b"half_pixel");

        let shape = graph
            .initializer
            .iter()
            .find(|t| t.name.as_deref() == Some(RESIZE_SHAPE))
            .unwrap();
        assert_eq!(shape.dims, vec![4]);
        assert_eq!(shape.int64_data, vec![1, 3, 640, 640]);

        for name in [RESIZE_ROI, RESIZE_SCALES] {
            let t = graph
                .initializer
                .iter()
                .find(|t| t.name.as_deref() == Some(name))
                .unwrap();
            assert_eq!(t.dims, vec![0]);
            assert_eq!(t.data_type, Some(data_type::FLOAT));
        }
    }

    #[test]
    fn test_everything_else_preserved() {
        let before = detection_model();
        let out = add_input_resize(&before, resolution(320, 320)).unwrap();
        let before_graph = before.graph.as_ref().unwrap();
        let after_graph = out.graph.as_ref().unwrap();

        // Only the rewired reference differs in the original nodes.
        let mut expected_conv = before_graph.node[0].clone();
        expected_conv.input[0] = RESIZED_OUTPUT.to_string();
        assert_eq!(after_graph.node[1], expected_conv);
        assert_eq!(after_graph.node[2], before_graph.node[1]);
        assert_eq!(after_graph.node.len(), before_graph.node.len() + 1);

        assert_eq!(after_graph.initializer[0], before_graph.initializer[0]);
        assert_eq!(after_graph.output, before_graph.output);
        assert_eq!(out.opset_import, before.opset_import);
        assert_eq!(out.producer_name, before.producer_name);
    }

    #[test]
    fn test_functions_and_sparse_initializers_survive_resize() {
        let mut model = detection_model();
        model.functions.push(vec![0x0a, 0x01, b'f']);
        model.training_info.push(vec![0x22, 0x00]);
        model
            .graph
            .as_mut()
            .unwrap()
            .sparse_initializer
            .push(vec![0x1a, 0x01, 0x01]);
        let bytes = encode_model(&model);

        let out = add_input_resize(&decode_model(&bytes).unwrap(), resolution(320, 320)).unwrap();
        let reloaded = decode_model(&encode_model(&out)).unwrap();

        assert_eq!(reloaded.functions, model.functions);
        assert_eq!(reloaded.training_info, model.training_info);
        assert_eq!(
            reloaded.graph.unwrap().sparse_initializer,
            model.graph.unwrap().sparse_initializer
        );
    }

    #[test]
    fn test_every_reference_is_rewired() {
        let mut model = detection_model();
        model.graph.as_mut().unwrap().node[1]
            .input
            .push("images".into());

        let out = add_input_resize(&model, resolution(320, 320)).unwrap();
        let graph = out.graph.unwrap();
        assert!(graph
            .node
            .iter()
            .all(|n| !n.input.iter().any(|i| i == "images")));
        assert_eq!(graph.node[2].input[1], RESIZED_OUTPUT);
    }

    #[test]
    fn test_symbolic_spatial_dims_rejected() {
        let mut model = detection_model();
        let input = &mut model.graph.as_mut().unwrap().input[0];
        *input = ValueInfoProto::tensor("images", data_type::FLOAT, &[1, 3, 640, 640]);
        if let Some(crate::export::onnx::type_proto::Value::TensorType(t)) =
            input.r#type.as_mut().and_then(|t| t.value.as_mut())
        {
            t.shape.as_mut().unwrap().dim[2].value = Some(
                crate::export::onnx::tensor_shape_proto::dimension::Value::DimParam(
                    "height".into(),
                ),
            );
        }

        assert!(matches!(
            add_input_resize(&model, resolution(320, 320)),
            Err(TrainpipeError::Export { .. })
        ));
    }

    #[test]
    fn test_name_collision_rejected() {
        let mut model = detection_model();
        model.graph.as_mut().unwrap().node[0].output[0] = RESIZED_OUTPUT.into();

        let err = add_input_resize(&model, resolution(320, 320)).unwrap_err();
        assert!(err.to_string().contains(RESIZED_OUTPUT));
    }

    #[test]
    fn test_multiple_inputs_rejected() {
        let mut model = detection_model();
        model
            .graph
            .as_mut()
            .unwrap()
            .input
            .push(ValueInfoProto::tensor("mask", data_type::FLOAT, &[1, 1, 640, 640]));

        assert!(add_input_resize(&model, resolution(320, 320)).is_err());
    }

    #[test]
    fn test_initializer_listed_as_input_is_ignored() {
        let mut model = detection_model();
        model
            .graph
            .as_mut()
            .unwrap()
            .input
            .push(ValueInfoProto::tensor("conv.weight", data_type::FLOAT, &[1]));

        let out = add_input_resize(&model, resolution(320, 320)).unwrap();
        let graph = out.graph.unwrap();
        assert_eq!(graph.input[0].name.as_deref(), Some(RESIZED_INPUT));
        assert_eq!(graph.input[1].name.as_deref(), Some("conv.weight"));
    }

    #[test]
    fn test_old_opset_rejected() {
        let mut model = detection_model();
        model.opset_import[0].version = Some(10);
        assert!(add_input_resize(&model, resolution(320, 320)).is_err());
    }
}
