//! Message records moved between ports, and their authorization envelope.

use std::collections::BTreeMap;

use blake3::Hasher;
use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::ids::{MessageId, PortId};
use crate::port::{CONTROL_DATA_TYPE, TENSOR_DATA_TYPE};

/// Payload handed to a port for sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Type tag checked by `data_type` validation.
    pub data_type: String,
    /// Declared tensor shape, if the content is a tensor.
    #[serde(default)]
    pub shape: Option<Vec<usize>>,
    /// Raw content; tensors are little-endian f32.
    pub content: Bytes,
}

impl MessagePayload {
    /// Payload with an arbitrary type tag.
    pub fn raw(data_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            data_type: data_type.into(),
            shape: None,
            content: content.into(),
        }
    }

    /// Tensor payload encoded as little-endian f32.
    pub fn tensor(values: &[f32], shape: Vec<usize>) -> Self {
        Self {
            data_type: TENSOR_DATA_TYPE.into(),
            shape: Some(shape),
            content: encode_f32(values),
        }
    }

    /// Control payload.
    pub fn control(content: impl Into<Bytes>) -> Self {
        Self::raw(CONTROL_DATA_TYPE, content)
    }

    /// Decode the content as f32 values, `None` when the length is not a multiple of 4.
    pub fn as_f32(&self) -> Option<Vec<f32>> {
        if self.content.len() % 4 != 0 {
            return None;
        }
        Some(
            self.content
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Digest binding type tag, shape and content.
    pub fn digest(&self) -> [u8; 32] {
        message_digest(self)
    }
}

/// Encode f32 values as little-endian bytes.
pub fn encode_f32(values: &[f32]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}

/// Hash a payload under the membrane payload domain.
pub fn message_digest(payload: &MessagePayload) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(b"membrane:payload");
    hasher.update(payload.data_type.as_bytes());
    if let Some(shape) = &payload.shape {
        for dim in shape {
            hasher.update(&(*dim as u64).to_le_bytes());
        }
    }
    hasher.update(&payload.content);
    *hasher.finalize().as_bytes()
}

/// Signature over a payload digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// ed25519 verifying key of the signer.
    pub signer: [u8; 32],
    /// ed25519 signature over the payload digest.
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl Authorization {
    /// Sign `payload` with `key`.
    pub fn sign(payload: &MessagePayload, key: &SigningKey) -> Self {
        let sig = key.sign(&message_digest(payload));
        Self {
            signer: key.verifying_key().to_bytes(),
            signature: sig.to_bytes(),
        }
    }

    /// Verify the signature against `digest`.
    pub fn verify(&self, digest: &[u8; 32]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.signer) else {
            return false;
        };
        key.verify(digest, &Signature::from_bytes(&self.signature))
            .is_ok()
    }
}

/// What a caller hands to `send_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    /// Payload.
    pub payload: MessagePayload,
    /// Optional signature, required by control ports.
    #[serde(default)]
    pub authorization: Option<Authorization>,
    /// Free-form metadata carried end to end.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Outbound {
    /// Signed outbound message.
    pub fn signed(payload: MessagePayload, key: &SigningKey) -> Self {
        let authorization = Some(Authorization::sign(&payload, key));
        Self {
            payload,
            authorization,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<MessagePayload> for Outbound {
    fn from(payload: MessagePayload) -> Self {
        Self {
            payload,
            authorization: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Record of one applied transformation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRecord {
    /// Rule that ran.
    pub rule_id: String,
    /// Kind label.
    pub kind: String,
    /// Accounted size before the step.
    pub size_before: usize,
    /// Accounted size after the step.
    pub size_after: usize,
    /// When the step ran.
    pub at_ms: u64,
}

/// Full message record as it travels through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortMessage {
    /// Generated id.
    pub id: MessageId,
    /// Port that built the message.
    pub source_port: PortId,
    /// Port the message was delivered to, once routed.
    pub target_port: Option<PortId>,
    /// Creation time.
    pub timestamp_ms: u64,
    /// Ports crossed so far.
    pub hop_count: u32,
    /// Current payload.
    pub payload: MessagePayload,
    /// Accounted size in bytes, reduced by compression.
    pub content_size: usize,
    /// Digest of the payload as it was first built.
    pub origin_digest: [u8; 32],
    /// Signature carried from the sender.
    pub authorization: Option<Authorization>,
    /// Content is keystream-encrypted.
    pub encrypted: bool,
    /// Caller metadata.
    pub metadata: BTreeMap<String, String>,
    /// Applied transformation steps, in order.
    pub transformations: Vec<TransformationRecord>,
}

impl PortMessage {
    /// Build a fresh record from an outbound request.
    pub fn build(id: MessageId, source_port: PortId, outbound: Outbound, now_ms: u64) -> Self {
        let origin_digest = outbound.payload.digest();
        Self {
            id,
            source_port,
            target_port: None,
            timestamp_ms: now_ms,
            hop_count: 0,
            content_size: outbound.payload.content.len(),
            payload: outbound.payload,
            origin_digest,
            authorization: outbound.authorization,
            encrypted: false,
            metadata: outbound.metadata,
            transformations: Vec::new(),
        }
    }
}
