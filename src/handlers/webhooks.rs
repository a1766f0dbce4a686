//! Inbound webhooks from peer services.
//!
//! Delivery from peers is at-least-once, so every handler here must be safe to
//! run twice for the same payload. None of them keep state yet.

use axum::{body::Bytes, extract::Path, response::Json};
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::models::InboundEvent;

// POST /webhooks/:service-events
pub async fn receive(Path(topic): Path<String>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let Some(service) = topic.strip_suffix("-events").filter(|s| !s.is_empty()) else {
        return Err(ApiError::NotFound(format!("No webhook route for '{}'", topic)));
    };

    // Malformed bodies are acknowledged like any other delivery.
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    info!(source = service, payload = %payload, "Received webhook from {}", service);

    let event = InboundEvent::parse(payload.get("event").and_then(Value::as_str));
    dispatch(service, &event, &payload);

    Ok(Json(json!({ "status": "received" })))
}

fn dispatch(service: &str, event: &InboundEvent, payload: &Value) {
    match event {
        InboundEvent::OrderCreated => on_order_created(service, payload),
        InboundEvent::PaymentCompleted => on_payment_completed(service, payload),
        InboundEvent::Unknown(name) => info!(source = service, "Unknown event type: {}", name),
    }
}

/// A top-level payload field, `null` when absent.
fn field(payload: &Value, key: &str) -> Value {
    payload.get(key).cloned().unwrap_or_default()
}

fn on_order_created(service: &str, payload: &Value) {
    let order_id = field(payload, "order_id");
    let user_id = field(payload, "user_id");
    info!(
        source = service,
        order_id = %order_id,
        user_id = %user_id,
        "Order created for user"
    );
}

fn on_payment_completed(service: &str, payload: &Value) {
    let payment_id = field(payload, "payment_id");
    let user_id = field(payload, "user_id");
    info!(
        source = service,
        payment_id = %payment_id,
        user_id = %user_id,
        "Payment completed for user"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured(run: impl FnOnce()) -> String {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, run);
        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn order_and_payment_ids_are_logged() {
        let output = captured(|| {
            dispatch("order", &InboundEvent::OrderCreated, &json!({"order_id": 42, "user_id": 7}));
            dispatch("payment", &InboundEvent::PaymentCompleted, &json!({"payment_id": "p-1"}));
        });

        assert!(output.contains("order_id=42"), "{}", output);
        assert!(output.contains("user_id=7"), "{}", output);
        assert!(output.contains("payment_id=\"p-1\""), "{}", output);
        assert!(output.contains("user_id=null"), "{}", output);
    }

    #[test]
    fn missing_fields_are_null() {
        assert_eq!(field(&json!({"order_id": 1}), "user_id"), Value::Null);
        assert_eq!(field(&Value::Null, "order_id"), Value::Null);
    }
}
