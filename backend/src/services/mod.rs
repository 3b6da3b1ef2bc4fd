pub mod codec;
pub mod normalize;
pub mod perception;
pub mod onnx;
pub mod skeleton;
pub mod mask_policy;
pub mod conditioning;
pub mod generation;
pub mod composite;
pub mod pipeline;

#[cfg(test)]
pub mod fakes;
