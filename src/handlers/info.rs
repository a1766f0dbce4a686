use axum::response::Json;
use serde_json::{json, Value};

use crate::config::SERVICE_NAME;
use crate::models::EventType;

// GET /info
pub async fn info() -> Json<Value> {
    let published: Vec<&str> = EventType::ALL.iter().map(EventType::as_str).collect();

    Json(json!({
        "service_name": SERVICE_NAME,
        "capabilities": [
            "user_management",
            "user_authentication",
            "user_search_and_filtering",
            "event_publishing",
        ],
        "endpoints": {
            "GET /api/users": "List users with search, filter, sort, pagination",
            "POST /api/users/search": "Search users with filter operators and multi-field sort",
            "GET /api/users/{id}": "Get specific user",
            "POST /api/users": "Create new user",
            "PUT /api/users/{id}": "Update user (full)",
            "PATCH /api/users/{id}": "Update user (partial)",
            "DELETE /api/users/{id}": "Delete user",
        },
        "events_published": published,
        "events_consumed": ["order.created", "payment.completed"],
    }))
}
