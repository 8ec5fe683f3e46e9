//! `POST /api/v1/echo`: returns the submitted message.
//!
//! Exercises the full pipeline: logging, rate limiting and required-field
//! validation of `message`.

use serde_json::{Value, json};

use crate::error::{ApiException, HandlerResult};
use crate::models::{ApiReply, RequestContext};

/// Longest message echoed back.
pub const MAX_MESSAGE_LEN: usize = 1000;

pub async fn echo(ctx: RequestContext) -> HandlerResult {
    let message = match ctx.body.get("message") {
        Some(Value::String(message)) => message.trim().to_string(),
        _ => return Err(ApiException::bad_request("message must be a string").into()),
    };

    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiException::bad_request(format!(
            "message exceeds {MAX_MESSAGE_LEN} characters"
        ))
        .into());
    }

    Ok(ApiReply::ok(
        "Success",
        json!({
            "message": message,
            "identity": ctx.identity.to_string(),
            "request_id": ctx.request_id,
        }),
    ))
}
