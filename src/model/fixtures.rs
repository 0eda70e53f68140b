//! Small modules shared by unit tests.

use super::{Layer, LayerKind, Module, Parameter};

/// Deterministic weights `1..=n` scaled by `scale`, alternating sign.
pub(crate) fn ramp(shape: &[usize], scale: f32) -> Parameter {
    let n: usize = shape.iter().product();
    let values = (1..=n)
        .map(|i| {
            let sign = if i % 2 == 0 { -1.0 } else { 1.0 };
            sign * i as f32 * scale
        })
        .collect();
    Parameter::from_shape_vec(shape, values)
}

/// conv1 -> bn1 -> fc: two prunable layers and one norm layer.
pub(crate) fn conv_net() -> Module {
    Module::new()
        .with_layer(
            "conv1",
            Layer::conv(ramp(&[4, 2, 2, 2], 0.1), Some(ramp(&[4], 0.01))),
        )
        .with_layer(
            "bn1",
            Layer::new(LayerKind::Norm)
                .with_param("weight", ramp(&[4], 1.0))
                .with_param("bias", ramp(&[4], 0.5)),
        )
        .with_layer("fc", Layer::linear(ramp(&[3, 8], 0.05), Some(ramp(&[3], 0.01))))
}

/// Module with a single linear layer of the given shape.
pub(crate) fn single_linear(out_features: usize, in_features: usize) -> Module {
    Module::new().with_layer(
        "fc",
        Layer::linear(ramp(&[out_features, in_features], 0.01), None),
    )
}
