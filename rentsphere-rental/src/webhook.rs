//! Processor webhook authentication and parsing.
//!
//! Signature header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`, where each
//! HMAC-SHA256 is computed with the endpoint secret over `"<t>.<raw body>"`. Several `v1`
//! entries may be present while the processor rotates secrets.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rentsphere_core::payment::{PaymentEvent, PaymentEventKind, SignatureError};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookData {
    #[serde(default)]
    object: PaymentIntentObject,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentIntentObject {
    id: Option<String>,
    metadata: Option<serde_json::Value>,
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(mac)
}

/// Build the header value the processor would send for `body` at `timestamp`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let signature = mac_for(secret, timestamp, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default();
    format!("t={},v1={}", timestamp, signature)
}

/// Check `header` against `body`. Timestamps further than `tolerance_seconds` from `now` are
/// rejected so captured deliveries cannot be replayed later.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    if header.trim().is_empty() {
        return Err(SignatureError::MissingHeader);
    }

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::MalformedHeader)?);
            }
            Some(("v1", value)) => candidates.push(value),
            // Other schemes (e.g. v0 test signatures) are ignored
            Some(_) => {}
            None => return Err(SignatureError::MalformedHeader),
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    // `t` is attacker-controlled until the MAC checks out
    let age_seconds = now.checked_sub(timestamp).ok_or(SignatureError::MalformedHeader)?;
    match age_seconds.checked_abs() {
        Some(age) if age <= tolerance_seconds => {}
        _ => return Err(SignatureError::StaleTimestamp { age_seconds }),
    }

    let matched = candidates.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        mac_for(secret, timestamp, body)
            .map(|mac| mac.verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Parse a verified body into a [`PaymentEvent`].
pub fn parse_event(body: &[u8]) -> Result<PaymentEvent, SignatureError> {
    let envelope: WebhookEnvelope =
        serde_json::from_slice(body).map_err(|e| SignatureError::InvalidPayload(e.to_string()))?;

    let rental_id = envelope
        .data
        .object
        .metadata
        .as_ref()
        .and_then(|m| m.get("rental_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());

    Ok(PaymentEvent {
        id: envelope.id,
        kind: PaymentEventKind::from(envelope.type_.as_str()),
        external_ref: envelope.data.object.id,
        rental_id,
    })
}

/// Signature check first, then parse. Nothing is read from the body before it is authenticated.
pub fn verify_and_parse(
    secret: &str,
    tolerance_seconds: i64,
    body: &[u8],
    header: &str,
) -> Result<PaymentEvent, SignatureError> {
    verify_signature(secret, body, header, tolerance_seconds, Utc::now().timestamp())?;
    parse_event(body)
}
