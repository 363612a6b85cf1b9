//! Validation and transformation stages shared by the send and receive paths.

use bytes::Bytes;
use blake3::Hasher;

use membrane_spec::{
    encode_f32, PortChannelConfig, PortMessage, TransformationKind, TransformationRecord,
    TransformationRuleSpec, ValidationKind, ValidationRuleSpec,
};

use crate::error::{PortError, RuleCheck};

/// Run every enabled validation rule. Never short-circuits. `keys` are the
/// keystream keys the validating port can open encrypted content with.
pub fn validate(
    rules: &[ValidationRuleSpec],
    keys: &[[u8; 32]],
    message: &PortMessage,
) -> Vec<RuleCheck> {
    rules
        .iter()
        .filter(|rule| rule.enabled)
        .map(|rule| {
            let verdict = check(&rule.kind, keys, message);
            RuleCheck {
                rule_id: rule.id.clone(),
                kind: rule.kind.label().to_string(),
                passed: verdict.is_ok(),
                reason: verdict.err(),
            }
        })
        .collect()
}

/// Encryption keys configured on a port.
pub(crate) fn sealing_keys(config: &PortChannelConfig) -> Vec<[u8; 32]> {
    config
        .transformation_rules
        .iter()
        .filter_map(|rule| match rule.kind {
            TransformationKind::Encryption { key } => Some(key),
            _ => None,
        })
        .collect()
}

fn check(kind: &ValidationKind, keys: &[[u8; 32]], message: &PortMessage) -> Result<(), String> {
    let payload = &message.payload;
    match kind {
        ValidationKind::DataType { expected } => {
            if &payload.data_type != expected {
                return Err(format!("expected {expected}, got {}", payload.data_type));
            }
        }
        ValidationKind::TensorShape { expected } => {
            match &payload.shape {
                Some(shape) if shape == expected => {}
                Some(shape) => return Err(format!("expected shape {expected:?}, got {shape:?}")),
                None => return Err("payload declares no shape".into()),
            }
            if message.encrypted {
                return Ok(());
            }
            let elements: usize = expected.iter().product();
            if payload.content.len() != elements * 4 {
                return Err(format!(
                    "shape {expected:?} needs {} bytes, content has {}",
                    elements * 4,
                    payload.content.len()
                ));
            }
        }
        ValidationKind::MaxSize { max_bytes } => {
            if payload.content.len() > *max_bytes {
                return Err(format!(
                    "{} bytes exceeds {max_bytes}",
                    payload.content.len()
                ));
            }
        }
        ValidationKind::ValueRange { min, max } => {
            let values = payload
                .as_f32()
                .ok_or_else(|| "content is not f32 aligned".to_string())?;
            if let Some(v) = values.iter().find(|v| !(*v >= min && *v <= max)) {
                return Err(format!("{v} outside [{min}, {max}]"));
            }
        }
        ValidationKind::Authorization { allowed_signers } => {
            let auth = message
                .authorization
                .as_ref()
                .ok_or_else(|| "missing authorization".to_string())?;
            if !allowed_signers.is_empty() && !allowed_signers.contains(&auth.signer) {
                return Err("signer not allowed".into());
            }
            if !auth.verify(&message.origin_digest) {
                return Err("signature does not verify".into());
            }
            if message.transformations.iter().any(|t| rewrites_content(&t.kind)) {
                return Err("content was rewritten after signing".into());
            }
            if !matches_origin(keys, message) {
                return Err("payload differs from the signed digest".into());
            }
        }
    }
    Ok(())
}

fn rewrites_content(kind: &str) -> bool {
    matches!(kind, "normalization" | "reshape")
}

/// The signed payload is recoverable from the message as carried.
fn matches_origin(keys: &[[u8; 32]], message: &PortMessage) -> bool {
    if !message.encrypted {
        return message.payload.digest() == message.origin_digest;
    }
    keys.iter().any(|key| {
        let mut opened = message.payload.clone();
        opened.content = decrypt_content(key, message);
        opened.digest() == message.origin_digest
    })
}

/// Apply enabled transformation rules in the order given. Compression and
/// encryption also require their gate on the port configuration.
pub fn transform(
    config: &PortChannelConfig,
    mut message: PortMessage,
    now_ms: u64,
) -> Result<PortMessage, PortError> {
    for rule in config.transformation_rules.iter().filter(|r| r.enabled) {
        let gated = match rule.kind {
            TransformationKind::Compression { .. } => config.compression_enabled,
            TransformationKind::Encryption { .. } => config.encryption_enabled,
            _ => true,
        };
        if !gated {
            continue;
        }
        message = apply(rule, message, now_ms)?;
    }
    Ok(message)
}

fn apply(
    rule: &TransformationRuleSpec,
    mut message: PortMessage,
    now_ms: u64,
) -> Result<PortMessage, PortError> {
    let fail = |reason: &str| PortError::TransformationFailed {
        rule_id: rule.id.clone(),
        reason: reason.to_string(),
    };
    let size_before = message.content_size;
    match &rule.kind {
        TransformationKind::Compression { ratio } => {
            message.content_size = (size_before as f64 * ratio).ceil() as usize;
        }
        TransformationKind::Encryption { key } => {
            if message.encrypted {
                return Ok(message);
            }
            let sealed = keystream_xor(key, message.id.as_str().as_bytes(), &message.payload.content);
            message.payload.content = sealed;
            message.encrypted = true;
        }
        TransformationKind::Normalization => {
            if message.encrypted {
                return Err(fail("content is encrypted"));
            }
            let values = message
                .payload
                .as_f32()
                .ok_or_else(|| fail("content is not f32 aligned"))?;
            let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                let scaled: Vec<f32> = values.iter().map(|v| v / norm).collect();
                message.payload.content = encode_f32(&scaled);
            }
        }
        TransformationKind::Reshape { shape } => {
            if message.encrypted {
                return Err(fail("content is encrypted"));
            }
            if message.payload.content.len() % 4 != 0 {
                return Err(fail("content is not f32 aligned"));
            }
            let elements = message.payload.content.len() / 4;
            let wanted: usize = shape.iter().product();
            if wanted != elements {
                return Err(fail(&format!(
                    "shape {shape:?} holds {wanted} elements, content has {elements}"
                )));
            }
            message.payload.shape = Some(shape.clone());
        }
    }
    message.transformations.push(TransformationRecord {
        rule_id: rule.id.clone(),
        kind: rule.kind.label().to_string(),
        size_before,
        size_after: message.content_size,
        at_ms: now_ms,
    });
    Ok(message)
}

/// Undo an encryption step applied with `key`.
pub fn decrypt_content(key: &[u8; 32], message: &PortMessage) -> Bytes {
    if !message.encrypted {
        return message.payload.content.clone();
    }
    keystream_xor(key, message.id.as_str().as_bytes(), &message.payload.content)
}

fn keystream_xor(key: &[u8; 32], nonce: &[u8], content: &[u8]) -> Bytes {
    let mut hasher = Hasher::new_keyed(key);
    hasher.update(b"membrane:keystream");
    hasher.update(nonce);
    let mut stream = vec![0u8; content.len()];
    hasher.finalize_xof().fill(&mut stream);
    for (byte, k) in stream.iter_mut().zip(content) {
        *byte ^= k;
    }
    Bytes::from(stream)
}
