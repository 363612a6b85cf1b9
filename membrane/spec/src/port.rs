//! Port channel configuration: direction, status, validation and transformation rules.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::{positive, ConfigError};
use crate::ids::{MembraneId, PortId};

/// Suffix of the default tensor input port.
pub const TENSOR_INPUT: &str = "tensor-input";
/// Suffix of the default tensor output port.
pub const TENSOR_OUTPUT: &str = "tensor-output";
/// Suffix of the default control port.
pub const CONTROL: &str = "control";

/// Data type tag of tensor ports.
pub const TENSOR_DATA_TYPE: &str = "tensor";
/// Data type tag of control ports.
pub const CONTROL_DATA_TYPE: &str = "control";

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Receives only.
    Input,
    /// Sends only.
    Output,
    /// Sends and receives.
    Bidirectional,
}

impl PortDirection {
    /// Input-to-input and output-to-output pairs are forbidden.
    pub fn compatible_with(self, other: PortDirection) -> bool {
        !matches!(
            (self, other),
            (PortDirection::Input, PortDirection::Input)
                | (PortDirection::Output, PortDirection::Output)
        )
    }

    /// Whether the port may originate messages.
    pub fn can_send(self) -> bool {
        matches!(self, PortDirection::Output | PortDirection::Bidirectional)
    }

    /// Whether the port may buffer incoming messages.
    pub fn can_receive(self) -> bool {
        matches!(self, PortDirection::Input | PortDirection::Bidirectional)
    }
}

/// Operational status of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    /// Accepting traffic.
    #[default]
    Active,
    /// Detached or not yet attached.
    Inactive,
    /// Temporarily refusing traffic.
    Blocked,
    /// Faulted; candidate for failover.
    Error,
    /// Drained by failover or an operator.
    Maintenance,
}

/// Advisory label on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Point to point.
    #[default]
    Direct,
    /// One of several targets of the same source.
    Multicast,
    /// Fan-out to every peer.
    Broadcast,
}

/// Validation rule kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationKind {
    /// Payload `data_type` must equal `expected`.
    DataType {
        /// Expected tag.
        expected: String,
    },
    /// Payload shape must equal `expected` and agree with the f32 element count.
    TensorShape {
        /// Expected shape.
        expected: Vec<usize>,
    },
    /// Payload content must not exceed `max_bytes`.
    MaxSize {
        /// Byte limit.
        max_bytes: usize,
    },
    /// Every f32 element must lie in `[min, max]`.
    ValueRange {
        /// Lower bound.
        min: f32,
        /// Upper bound.
        max: f32,
    },
    /// Message must carry a valid signature from an allowed signer.
    Authorization {
        /// Accepted signer keys; empty accepts any valid signature.
        #[serde(default)]
        allowed_signers: Vec<[u8; 32]>,
    },
}

impl ValidationKind {
    /// Short label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            ValidationKind::DataType { .. } => "data_type",
            ValidationKind::TensorShape { .. } => "tensor_shape",
            ValidationKind::MaxSize { .. } => "max_size",
            ValidationKind::ValueRange { .. } => "value_range",
            ValidationKind::Authorization { .. } => "authorization",
        }
    }
}

/// Transformation rule kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformationKind {
    /// Scale the accounted `content_size` by `ratio`.
    Compression {
        /// Multiplier in `(0, 1]`.
        ratio: f64,
    },
    /// XOR the content with a blake3 keyed keystream.
    Encryption {
        /// Keystream key.
        key: [u8; 32],
    },
    /// L2-normalise an f32 tensor payload.
    Normalization,
    /// Replace the declared shape, keeping the element count.
    Reshape {
        /// New shape.
        shape: Vec<usize>,
    },
}

impl TransformationKind {
    /// Short label for logs and transformation records.
    pub fn label(&self) -> &'static str {
        match self {
            TransformationKind::Compression { .. } => "compression",
            TransformationKind::Encryption { .. } => "encryption",
            TransformationKind::Normalization => "normalization",
            TransformationKind::Reshape { .. } => "reshape",
        }
    }
}

fn enabled_default() -> bool {
    true
}

/// A configured validation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRuleSpec {
    /// Rule id, unique within the port.
    pub id: String,
    /// What the rule checks.
    #[serde(flatten)]
    pub kind: ValidationKind,
    /// Disabled rules are skipped.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

impl ValidationRuleSpec {
    /// Enabled rule.
    pub fn new(id: impl Into<String>, kind: ValidationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
        }
    }
}

/// A configured transformation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRuleSpec {
    /// Rule id, unique within the port.
    pub id: String,
    /// What the rule does.
    #[serde(flatten)]
    pub kind: TransformationKind,
    /// Lower runs first.
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules are skipped.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

impl TransformationRuleSpec {
    /// Enabled rule.
    pub fn new(id: impl Into<String>, kind: TransformationKind, priority: i32) -> Self {
        Self {
            id: id.into(),
            kind,
            priority,
            enabled: true,
        }
    }
}

/// Port channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortChannelConfig {
    /// Port id.
    pub id: PortId,
    /// Display name.
    pub name: String,
    /// Direction.
    pub direction: PortDirection,
    /// Accepted payload type tag.
    pub data_type: String,
    /// Declared tensor shape, if any.
    #[serde(default)]
    pub tensor_shape: Option<Vec<usize>>,
    /// The only membrane this port may attach to.
    pub membrane_id: MembraneId,
    /// Connection capacity.
    pub max_connections: usize,
    /// Buffer capacity.
    pub buffer_size: usize,
    /// Gate for compression transforms.
    #[serde(default)]
    pub compression_enabled: bool,
    /// Gate for encryption transforms.
    #[serde(default)]
    pub encryption_enabled: bool,
    /// Ordered validation rules.
    #[serde(default)]
    pub validation_rules: Vec<ValidationRuleSpec>,
    /// Transformation rules, run in ascending priority.
    #[serde(default)]
    pub transformation_rules: Vec<TransformationRuleSpec>,
}

impl PortChannelConfig {
    /// Bare configuration without rules.
    pub fn new(
        id: impl Into<PortId>,
        direction: PortDirection,
        data_type: impl Into<String>,
        membrane_id: MembraneId,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            direction,
            data_type: data_type.into(),
            tensor_shape: None,
            membrane_id,
            max_connections: 16,
            buffer_size: 100,
            compression_enabled: false,
            encryption_enabled: false,
            validation_rules: Vec::new(),
            transformation_rules: Vec::new(),
        }
    }

    /// Override capacities.
    pub fn with_capacity(mut self, buffer_size: usize, max_connections: usize) -> Self {
        self.buffer_size = buffer_size;
        self.max_connections = max_connections;
        self
    }

    /// Append a validation rule.
    pub fn with_validation(mut self, rule: ValidationRuleSpec) -> Self {
        self.validation_rules.push(rule);
        self
    }

    /// Append a transformation rule, enabling the gate its kind requires.
    pub fn with_transformation(mut self, rule: TransformationRuleSpec) -> Self {
        match rule.kind {
            TransformationKind::Compression { .. } => self.compression_enabled = true,
            TransformationKind::Encryption { .. } => self.encryption_enabled = true,
            _ => {}
        }
        self.transformation_rules.push(rule);
        self
    }

    /// Default tensor input port: checks data type and, when known, shape.
    pub fn tensor_input(membrane: &MembraneId, shape: &[usize]) -> Self {
        let mut cfg = Self::new(
            PortId::for_membrane(membrane, TENSOR_INPUT),
            PortDirection::Input,
            TENSOR_DATA_TYPE,
            membrane.clone(),
        )
        .with_validation(ValidationRuleSpec::new(
            "tensor-data-type",
            ValidationKind::DataType {
                expected: TENSOR_DATA_TYPE.into(),
            },
        ));
        cfg.declare_shape(shape);
        cfg
    }

    /// Declare the tensor shape the port accepts, replacing any earlier
    /// shape rule. An empty shape accepts any shape.
    pub fn declare_shape(&mut self, shape: &[usize]) {
        self.validation_rules
            .retain(|rule| !matches!(rule.kind, ValidationKind::TensorShape { .. }));
        if shape.is_empty() {
            self.tensor_shape = None;
            return;
        }
        self.tensor_shape = Some(shape.to_vec());
        self.validation_rules.push(ValidationRuleSpec::new(
            "tensor-shape",
            ValidationKind::TensorShape {
                expected: shape.to_vec(),
            },
        ));
    }

    /// Default tensor output port: compresses outgoing tensors.
    pub fn tensor_output(membrane: &MembraneId, compression_ratio: f64) -> Self {
        Self::new(
            PortId::for_membrane(membrane, TENSOR_OUTPUT),
            PortDirection::Output,
            TENSOR_DATA_TYPE,
            membrane.clone(),
        )
        .with_validation(ValidationRuleSpec::new(
            "tensor-data-type",
            ValidationKind::DataType {
                expected: TENSOR_DATA_TYPE.into(),
            },
        ))
        .with_transformation(TransformationRuleSpec::new(
            "default-compression",
            TransformationKind::Compression {
                ratio: compression_ratio,
            },
            10,
        ))
    }

    /// Default control port: requires authorization and encrypts traffic.
    pub fn control(membrane: &MembraneId, allowed_signers: Vec<[u8; 32]>, key: [u8; 32]) -> Self {
        Self::new(
            PortId::for_membrane(membrane, CONTROL),
            PortDirection::Bidirectional,
            CONTROL_DATA_TYPE,
            membrane.clone(),
        )
        .with_validation(ValidationRuleSpec::new(
            "control-authorization",
            ValidationKind::Authorization { allowed_signers },
        ))
        .with_transformation(TransformationRuleSpec::new(
            "default-encryption",
            TransformationKind::Encryption { key },
            10,
        ))
    }

    /// Reject malformed port configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.as_str().is_empty() {
            return Err(ConfigError::EmptyField("port id"));
        }
        if self.membrane_id.as_str().is_empty() {
            return Err(ConfigError::EmptyField("membrane_id"));
        }
        positive("buffer_size", self.buffer_size)?;
        positive("max_connections", self.max_connections)?;
        let mut seen = HashSet::new();
        for id in self.validation_rules.iter().map(|r| &r.id) {
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::DuplicateRule(id.clone()));
            }
        }
        let mut seen = HashSet::new();
        for rule in &self.transformation_rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.id.clone()));
            }
            if let TransformationKind::Compression { ratio } = rule.kind {
                if !(ratio > 0.0 && ratio <= 1.0) {
                    return Err(ConfigError::OutOfRange {
                        field: "compression ratio",
                        detail: format!("{ratio} not in (0, 1]"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_compatibility() {
        use PortDirection::*;
        assert!(!Input.compatible_with(Input));
        assert!(!Output.compatible_with(Output));
        assert!(Output.compatible_with(Input));
        assert!(Bidirectional.compatible_with(Bidirectional));
        assert!(Input.compatible_with(Bidirectional));
    }

    #[test]
    fn default_ports_are_valid() {
        let m = MembraneId::from("m");
        assert!(PortChannelConfig::tensor_input(&m, &[2, 3]).validate().is_ok());
        assert!(PortChannelConfig::tensor_output(&m, 0.5).validate().is_ok());
        assert!(PortChannelConfig::control(&m, vec![], [7; 32]).validate().is_ok());
        assert_eq!(
            PortChannelConfig::tensor_input(&m, &[]).validation_rules.len(),
            1,
            "shape rule only when shape is known"
        );
    }

    #[test]
    fn duplicate_rule_ids_rejected() {
        let cfg = PortChannelConfig::new("p", PortDirection::Input, "tensor", "m".into())
            .with_validation(ValidationRuleSpec::new("a", ValidationKind::MaxSize { max_bytes: 8 }))
            .with_validation(ValidationRuleSpec::new("a", ValidationKind::MaxSize { max_bytes: 9 }));
        assert_eq!(cfg.validate(), Err(ConfigError::DuplicateRule("a".into())));
    }

    #[test]
    fn rule_specs_deserialize_flat() {
        let rule: TransformationRuleSpec =
            serde_json::from_str(r#"{"id":"c","type":"compression","ratio":0.25,"priority":3}"#)
                .unwrap();
        assert_eq!(rule.kind, TransformationKind::Compression { ratio: 0.25 });
        assert!(rule.enabled);
        let rule: ValidationRuleSpec =
            serde_json::from_str(r#"{"id":"n","type":"data_type","expected":"tensor","enabled":false}"#)
                .unwrap();
        assert!(!rule.enabled);
    }
}
