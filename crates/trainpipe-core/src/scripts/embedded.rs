//! Python helper scripts shipped inside the binary.
//!
//! Each script reports progress as one JSON object per stdout line with an
//! `event` key (`epoch`, `log`, `error`, `done`).

pub const TRAIN_SCRIPT_NAME: &str = "train_yolo.py";
pub const EXPORT_ONNX_SCRIPT_NAME: &str = "export_onnx.py";
pub const COMPILE_BLOB_SCRIPT_NAME: &str = "compile_blob.py";
pub const CONVERT_UPLOAD_SCRIPT_NAME: &str = "convert_upload.py";
pub const REQUIREMENTS_NAME: &str = "requirements.txt";

/// Python requirements for the training virtual environment.
pub const REQUIREMENTS: &str = "\
ultralytics>=8.1.0
onnx>=1.15.0
onnxsim>=0.4.33
blobconverter>=1.4.2
tensorflowjs>=4.17.0
tensorflow-hub>=0.16.1
tf2onnx>=1.16.1
";

/// Train a YOLO detector, reporting every finished epoch.
pub const TRAIN_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Train a YOLO detection model on a prepared dataset.

Emits {"event": "epoch", "epoch": k, "metrics": {...}} after each epoch,
numbered from 1, and {"event": "done", "path": best_checkpoint} at the end.
"""
import argparse
import json
import os
import sys


def emit(event, **kwargs):
    print(json.dumps({"event": event, **kwargs}), flush=True)


def main():
    parser = argparse.ArgumentParser(description="Train a YOLO detector")
    parser.add_argument("--checkpoint", required=True, help="Base model checkpoint")
    parser.add_argument("--data", required=True, help="Dataset manifest (data.yaml)")
    parser.add_argument("--epochs", required=True, type=int)
    parser.add_argument("--device", default="cpu")
    parser.add_argument("--project", required=True, help="Run output directory")
    args = parser.parse_args()

    try:
        from ultralytics import YOLO
    except ImportError as e:
        emit("error", message=f"Missing required package: {e}")
        sys.exit(1)

    model = YOLO(args.checkpoint)

    def on_fit_epoch_end(trainer):
        metrics = {}
        for key, value in (trainer.metrics or {}).items():
            try:
                metrics[key] = float(value)
            except (TypeError, ValueError):
                pass
        emit("epoch", epoch=trainer.epoch + 1, metrics=metrics)

    model.add_callback("on_fit_epoch_end", on_fit_epoch_end)
    emit("log", message=f"training on {args.device}")

    try:
        model.train(
            data=args.data,
            epochs=args.epochs,
            device=args.device,
            project=args.project,
            name="train",
            exist_ok=True,
            verbose=False,
        )
    except Exception as e:
        emit("error", message=str(e))
        sys.exit(1)

    best = os.path.join(args.project, "train", "weights", "best.pt")
    emit("done", path=best)


if __name__ == "__main__":
    main()
"#;

/// Export a trained checkpoint to ONNX at a fixed input size.
pub const EXPORT_ONNX_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Export a YOLO checkpoint to ONNX.

Emits {"event": "done", "path": onnx_file} on success.
"""
import argparse
import json
import os
import shutil
import sys


def emit(event, **kwargs):
    print(json.dumps({"event": event, **kwargs}), flush=True)


def main():
    parser = argparse.ArgumentParser(description="Export a YOLO checkpoint to ONNX")
    parser.add_argument("--checkpoint", required=True)
    parser.add_argument("--output-dir", required=True)
    parser.add_argument("--height", required=True, type=int)
    parser.add_argument("--width", required=True, type=int)
    parser.add_argument("--opset", default=12, type=int)
    args = parser.parse_args()

    try:
        from ultralytics import YOLO
    except ImportError as e:
        emit("error", message=f"Missing required package: {e}")
        sys.exit(1)

    try:
        model = YOLO(args.checkpoint)
        exported = model.export(
            format="onnx",
            imgsz=[args.height, args.width],
            opset=args.opset,
            simplify=True,
            dynamic=False,
        )
    except Exception as e:
        emit("error", message=f"ONNX export failed: {e}")
        sys.exit(1)

    os.makedirs(args.output_dir, exist_ok=True)
    target = os.path.join(args.output_dir, "model.onnx")
    shutil.move(str(exported), target)
    emit("done", path=target)


if __name__ == "__main__":
    main()
"#;

/// Compile an ONNX graph to an OpenVINO/Myriad blob.
pub const COMPILE_BLOB_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Compile an ONNX model to a Myriad .blob.

Emits {"event": "done", "path": blob_file} on success.
"""
import argparse
import json
import sys


def emit(event, **kwargs):
    print(json.dumps({"event": event, **kwargs}), flush=True)


def main():
    parser = argparse.ArgumentParser(description="Compile ONNX to blob")
    parser.add_argument("--onnx", required=True)
    parser.add_argument("--output-dir", required=True)
    parser.add_argument("--data-type", default="FP16")
    parser.add_argument("--shaves", default=6, type=int)
    args = parser.parse_args()

    try:
        import blobconverter
    except ImportError as e:
        emit("error", message=f"Missing required package: {e}")
        sys.exit(1)

    try:
        blob = blobconverter.from_onnx(
            model=args.onnx,
            data_type=args.data_type,
            shaves=args.shaves,
            output_dir=args.output_dir,
            use_cache=False,
        )
    except Exception as e:
        emit("error", message=f"blob compilation failed: {e}")
        sys.exit(1)

    emit("done", path=str(blob))


if __name__ == "__main__":
    main()
"#;

/// Stack an uploaded TF.js classifier head on a base model's SavedModel and
/// compile the result to a blob.
pub const CONVERT_UPLOAD_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Compose base model + uploaded TF.js head, export ONNX, compile .blob.

Emits {"event": "done", "path": blob_file} on success.
"""
import argparse
import json
import os
import sys


def emit(event, **kwargs):
    print(json.dumps({"event": event, **kwargs}), flush=True)


def main():
    parser = argparse.ArgumentParser(description="Convert an uploaded TF.js head")
    parser.add_argument("--model-json", required=True)
    parser.add_argument("--weights", required=True)
    parser.add_argument("--base-model-dir", required=True)
    parser.add_argument("--input-shape", required=True)
    parser.add_argument("--output-dir", required=True)
    parser.add_argument("--data-type", default="FP16")
    parser.add_argument("--shaves", default=6, type=int)
    args = parser.parse_args()

    try:
        import blobconverter
        import keras
        import tensorflow_hub as hub
        import tensorflowjs as tfjs
        import tf2onnx
    except ImportError as e:
        emit("error", message=f"Missing required package: {e}")
        sys.exit(1)

    input_shape = json.loads(args.input_shape)
    height, width = input_shape[1], input_shape[2]

    try:
        with open(args.model_json, "rb") as json_file, open(args.weights, "rb") as weights_file:
            head = tfjs.converters.deserialize_keras_model(json_file, [weights_file])
        base = hub.KerasLayer(args.base_model_dir, trainable=False, name="base_model")
        model = keras.Sequential([base, head])
        model.build(input_shape)
        emit("log", message="composed base model and uploaded head")

        onnx_path = os.path.join(args.output_dir, "upload.onnx")
        tf2onnx.convert.from_keras(
            model, output_path=onnx_path, inputs_as_nchw=model.input_names
        )
    except Exception as e:
        emit("error", message=f"composing uploaded model failed: {e}")
        sys.exit(1)

    try:
        blob = blobconverter.from_onnx(
            model=onnx_path,
            data_type=args.data_type,
            shaves=args.shaves,
            optimizer_params=[
                "--mean_values=[0,0,0]",
                "--scale_values=[255,255,255]",
                f"--input_shape=[1,3,{height},{width}]",
            ],
            output_dir=args.output_dir,
            use_cache=False,
        )
    except Exception as e:
        emit("error", message=f"blob compilation failed: {e}")
        sys.exit(1)

    emit("done", path=str(blob))


if __name__ == "__main__":
    main()
"#;

/// `(file name, contents)` of everything deployed to the scripts directory.
pub const DEPLOYED_FILES: [(&str, &str); 5] = [
    (TRAIN_SCRIPT_NAME, TRAIN_SCRIPT),
    (EXPORT_ONNX_SCRIPT_NAME, EXPORT_ONNX_SCRIPT),
    (COMPILE_BLOB_SCRIPT_NAME, COMPILE_BLOB_SCRIPT),
    (CONVERT_UPLOAD_SCRIPT_NAME, CONVERT_UPLOAD_SCRIPT),
    (REQUIREMENTS_NAME, REQUIREMENTS),
];
