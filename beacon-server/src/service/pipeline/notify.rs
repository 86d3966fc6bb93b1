//! Requester notifications
//!
//! Sends are detached from the caller: lookups, rendering and delivery run
//! in their own task and every failure is logged, never returned.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::gateway::Notifier;
use crate::repository::{PipelineRepository, UserDirectory};
use crate::service::pipeline::catalog::RunCatalog;
use crate::service::pipeline::render;

pub const SUBJECT_TRIGGERED: &str = "Pipeline Triggered";
pub const SUBJECT_APPROVED: &str = "Pipeline Has Been Approved";
pub const SUBJECT_REJECTED: &str = "Pipeline Has Been Rejected";
pub const SUBJECT_COMPLETED: &str = "Pipeline Has Run And Completed Successfully";
pub const SUBJECT_FAILED: &str = "Pipeline Execution Failed";

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    repo: Arc<dyn PipelineRepository>,
    users: Arc<dyn UserDirectory>,
    catalog: RunCatalog,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        repo: Arc<dyn PipelineRepository>,
        users: Arc<dyn UserDirectory>,
        catalog: RunCatalog,
    ) -> Self {
        Self {
            notifier,
            repo,
            users,
            catalog,
        }
    }

    /// Send the current state of an authorization request to its requester
    pub fn authorization_request(&self, request_id: Uuid, subject: &'static str) {
        let this = self.clone();
        tokio::spawn(async move {
            let request = match this.repo.find_authorization(request_id).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    warn!("Authorization request {} vanished before notification", request_id);
                    return;
                }
                Err(e) => {
                    warn!("Failed to load authorization request {}: {}", request_id, e);
                    return;
                }
            };
            let request = match this.catalog.enrich_authorization(request).await {
                Ok(request) => request,
                Err(e) => {
                    warn!("Failed to resolve names for request {}: {}", request_id, e);
                    return;
                }
            };
            let html = match render::render_authorization_request(&request) {
                Ok(html) => html,
                Err(e) => {
                    warn!("Failed to render authorization request {}: {}", request_id, e);
                    return;
                }
            };
            this.deliver(request.requester_id, subject, html).await;
        });
    }

    /// Send an execution history row of `run_id` to its requester
    pub fn execution_history(&self, run_id: Uuid, history_id: Uuid, subject: &'static str) {
        let this = self.clone();
        tokio::spawn(async move {
            let history = match this.repo.list_history_for_run(run_id).await {
                Ok(histories) => histories.into_iter().find(|h| h.id == history_id),
                Err(e) => {
                    warn!(run_id = %run_id, "Failed to load execution history: {}", e);
                    return;
                }
            };
            let Some(history) = history else {
                warn!(run_id = %run_id, "Execution history {} not found", history_id);
                return;
            };
            let html = match render::render_execution_history(&history) {
                Ok(html) => html,
                Err(e) => {
                    warn!(run_id = %run_id, "Failed to render execution history: {}", e);
                    return;
                }
            };
            this.deliver(history.requester_id, subject, html).await;
        });
    }

    /// Resolve the requester's address and send; skipped when there is none
    async fn deliver(&self, requester_id: Uuid, subject: &str, html: String) {
        let address = match self.users.find_user(requester_id).await {
            Ok(Some(user)) => user.delivery_address().map(str::to_string),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to look up delivery address of {}: {}", requester_id, e);
                None
            }
        };

        let Some(address) = address else {
            warn!(
                "No delivery address for user {}, skipping \"{}\" notification",
                requester_id, subject
            );
            return;
        };

        match self.notifier.send_html(subject, &html, &[address]).await {
            Ok(()) => debug!("Notification \"{}\" sent to user {}", subject, requester_id),
            Err(e) => warn!("Failed to send \"{}\" notification: {}", subject, e),
        }
    }
}
