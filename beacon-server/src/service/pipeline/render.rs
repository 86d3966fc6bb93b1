//! HTML documents sent with pipeline notifications

use askama::Template;
use beacon_core::domain::pipeline::{AuthorizationRequest, ExecutionHistory};

const UNKNOWN: &str = "unknown";
const NONE: &str = "none";

#[derive(Template)]
#[template(path = "authorization_request.html")]
struct AuthorizationRequestTemplate<'a> {
    request: &'a AuthorizationRequest,
    requester: &'a str,
    approver: &'a str,
    comment: &'a str,
    macro_service: &'a str,
}

#[derive(Template)]
#[template(path = "execution_history.html")]
struct ExecutionHistoryTemplate<'a> {
    history: &'a ExecutionHistory,
    requester: &'a str,
    approver: &'a str,
    macro_service: &'a str,
    status: &'a str,
    completed_at: String,
    duration: String,
    error: &'a str,
}

pub fn render_authorization_request(request: &AuthorizationRequest) -> askama::Result<String> {
    AuthorizationRequestTemplate {
        request,
        requester: request.requester_name.as_deref().unwrap_or(UNKNOWN),
        approver: request.approver_name.as_deref().unwrap_or("awaiting approval"),
        comment: request.comment.as_deref().unwrap_or(""),
        macro_service: request.macro_service_name.as_deref().unwrap_or(NONE),
    }
    .render()
}

pub fn render_execution_history(history: &ExecutionHistory) -> askama::Result<String> {
    ExecutionHistoryTemplate {
        history,
        requester: history.requester_name.as_deref().unwrap_or(UNKNOWN),
        approver: history.approver_name.as_deref().unwrap_or(UNKNOWN),
        macro_service: history.macro_service_name.as_deref().unwrap_or(NONE),
        status: history.status.as_str(),
        completed_at: history
            .completed_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "in progress".to_string()),
        duration: history
            .execution_time_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string()),
        error: history.error_message.as_deref().unwrap_or(""),
    }
    .render()
}
