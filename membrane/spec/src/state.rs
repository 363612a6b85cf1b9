//! Opaque membrane state payload. The engine stores and copies it but never
//! interprets the tensor contents.

use serde::{Deserialize, Serialize};

/// State carried by a membrane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MembraneState {
    /// Flat numeric buffer.
    pub tensor_data: Vec<f32>,
    /// Tensor shape, every dimension positive.
    pub shape: Vec<usize>,
    /// Owning compute kernel.
    pub kernel_id: String,
    /// Free-form state type tag.
    pub state_type: String,
}

impl MembraneState {
    /// Build a state payload.
    pub fn new(
        tensor_data: Vec<f32>,
        shape: Vec<usize>,
        kernel_id: impl Into<String>,
        state_type: impl Into<String>,
    ) -> Self {
        Self {
            tensor_data,
            shape,
            kernel_id: kernel_id.into(),
            state_type: state_type.into(),
        }
    }

    /// Zero-filled state with the same shape, kernel and type tag as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            tensor_data: vec![0.0; self.tensor_data.len()],
            shape: self.shape.clone(),
            kernel_id: self.kernel_id.clone(),
            state_type: self.state_type.clone(),
        }
    }

    /// Bytes held by the tensor buffer.
    pub fn memory_bytes(&self) -> usize {
        self.tensor_data.len() * std::mem::size_of::<f32>()
    }

    /// Read one field by key.
    pub fn get(&self, key: StateKey) -> StateValue<'_> {
        match key {
            StateKey::TensorData => StateValue::TensorData(&self.tensor_data),
            StateKey::Shape => StateValue::Shape(&self.shape),
            StateKey::KernelId => StateValue::KernelId(&self.kernel_id),
            StateKey::StateType => StateValue::StateType(&self.state_type),
        }
    }
}

/// Addressable state fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    /// `tensor_data`
    TensorData,
    /// `shape`
    Shape,
    /// `kernel_id`
    KernelId,
    /// `state_type`
    StateType,
}

/// Borrowed view of a single state field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateValue<'a> {
    /// Tensor buffer.
    TensorData(&'a [f32]),
    /// Tensor shape.
    Shape(&'a [usize]),
    /// Kernel id.
    KernelId(&'a str),
    /// State type tag.
    StateType(&'a str),
}
