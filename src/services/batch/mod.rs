//! Batch coordinator.
//!
//! Runs an ordered list of command requests as one call, either inside a
//! single enclosing transaction (all or nothing) or as independent
//! submissions. Later items may feed on earlier items' responses through
//! `$.field` placeholders. A batch is not an idempotency scope of its own:
//! each item is admitted under its own key.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::command::{CommandAttempt, CommandDescriptor, Principal};
use crate::config::BatchConfig;
use crate::services::admission::{AdmissionError, CommandAdmission, CommandRequest};
use crate::services::error_translator::{translate_error, ErrorCategory, ErrorInfo};
use crate::storage::LedgerError;
use crate::utils::idempotency::IDEMPOTENCY_KEY_HEADER;

pub mod placeholder;
pub mod request;
pub mod routes;

pub use placeholder::PlaceholderError;
pub use request::{BatchRequest, BatchResponse, Header};
pub use routes::{ResolvedRoute, RouteTable};

pub const DEPENDENCY_FAILED_CODE: &str = "error.msg.batch.dependency.failed";
pub const ROUTE_NOT_FOUND_CODE: &str = "error.msg.batch.route.not.found";
pub const REFERENCE_INVALID_CODE: &str = "error.msg.batch.reference.invalid";
pub const PLACEHOLDER_UNRESOLVED_CODE: &str = "error.msg.batch.placeholder.unresolved";
pub const BODY_INVALID_CODE: &str = "error.msg.batch.body.invalid";
pub const TOO_MANY_REQUESTS_CODE: &str = "error.msg.batch.too.many.requests";

/// Batch coordinator.
pub struct BatchCoordinator {
    admission: Arc<CommandAdmission>,
    routes: RouteTable,
    config: BatchConfig,
}

impl BatchCoordinator {
    pub fn new(admission: Arc<CommandAdmission>, routes: RouteTable, config: BatchConfig) -> Self {
        Self {
            admission,
            routes,
            config,
        }
    }

    /// Run `requests` enclosed in one transaction or independently.
    pub async fn execute(
        &self,
        requests: &[BatchRequest],
        principal: &Principal,
        enclosing: bool,
    ) -> Vec<BatchResponse> {
        if enclosing {
            self.execute_enclosed(requests, principal).await
        } else {
            self.execute_independent(requests, principal).await
        }
    }

    /// Run every item in one transaction.
    ///
    /// The first failing item stops the batch and rolls everything back; the
    /// result then ends with that item's response. If the final commit fails,
    /// every item is answered with the storage error.
    pub async fn execute_enclosed(
        &self,
        requests: &[BatchRequest],
        principal: &Principal,
    ) -> Vec<BatchResponse> {
        if let Some(rejected) = self.reject_oversized(requests) {
            return rejected;
        }
        info!(items = requests.len(), "Executing enclosed batch");

        let mut uow = match self.admission.ledger().begin().await {
            Ok(uow) => uow,
            Err(e) => return answer_all(requests, &storage_error(e)),
        };

        let mut responses: Vec<BatchResponse> = Vec::with_capacity(requests.len());
        let mut seen: HashMap<i64, usize> = HashMap::new();

        for request in requests {
            let response = match self.prepare(request, principal, &responses, &seen) {
                Err(rejection) => rejection,
                Ok(command) => {
                    let submitted = self
                        .admission
                        .submit_joined(uow.connection(), &command)
                        .await;
                    respond(request, submitted)
                }
            };

            let failed = !response.is_success();
            let status_code = response.status_code;
            seen.insert(request.request_id, responses.len());
            responses.push(response);

            if failed {
                warn!(
                    request_id = request.request_id,
                    status_code,
                    "Enclosed batch item failed, rolling back"
                );
                if let Err(e) = uow.rollback().await {
                    warn!(error = %e, "Rollback of enclosed batch failed");
                }
                return responses;
            }
        }

        match uow.commit().await {
            Ok(()) => {
                info!(items = responses.len(), "Committed enclosed batch");
                responses
            }
            Err(e) => {
                warn!(error = %e, "Commit of enclosed batch failed");
                answer_all(requests, &storage_error(e))
            }
        }
    }

    /// Run every item in its own transaction.
    ///
    /// Returns exactly one response per item, in input order. An item that
    /// references a failed item is answered 403 without running.
    pub async fn execute_independent(
        &self,
        requests: &[BatchRequest],
        principal: &Principal,
    ) -> Vec<BatchResponse> {
        if let Some(rejected) = self.reject_oversized(requests) {
            return rejected;
        }
        info!(items = requests.len(), "Executing independent batch");

        let mut responses: Vec<BatchResponse> = Vec::with_capacity(requests.len());
        let mut seen: HashMap<i64, usize> = HashMap::new();

        for request in requests {
            let response = match self.prepare(request, principal, &responses, &seen) {
                Err(rejection) => rejection,
                Ok(command) => respond(request, self.admission.submit(&command).await),
            };
            debug!(
                request_id = request.request_id,
                status_code = response.status_code,
                "Batch item done"
            );
            seen.insert(request.request_id, responses.len());
            responses.push(response);
        }

        responses
    }

    fn reject_oversized(&self, requests: &[BatchRequest]) -> Option<Vec<BatchResponse>> {
        if requests.len() <= self.config.max_requests {
            return None;
        }
        warn!(
            items = requests.len(),
            max = self.config.max_requests,
            "Rejected oversized batch"
        );
        let info = ErrorInfo::new(
            StatusCode::BAD_REQUEST,
            TOO_MANY_REQUESTS_CODE,
            format!(
                "Batch of {} requests exceeds the limit of {}",
                requests.len(),
                self.config.max_requests
            ),
            ErrorCategory::Permanent,
        );
        Some(answer_all(requests, &info))
    }

    /// Resolve references, placeholders and the route of one item.
    fn prepare(
        &self,
        request: &BatchRequest,
        principal: &Principal,
        responses: &[BatchResponse],
        seen: &HashMap<i64, usize>,
    ) -> Result<CommandRequest, BatchResponse> {
        let (relative_url, body) = match request.reference {
            None => (request.relative_url.clone(), request.body.clone()),
            Some(reference) => {
                let Some(parent) = seen.get(&reference).and_then(|&i| responses.get(i)) else {
                    return Err(reject(
                        request,
                        StatusCode::BAD_REQUEST,
                        REFERENCE_INVALID_CODE,
                        format!("Request {reference} does not precede this request in the batch"),
                        vec![json!(reference)],
                    ));
                };
                if !parent.is_success() {
                    return Err(reject(
                        request,
                        StatusCode::FORBIDDEN,
                        DEPENDENCY_FAILED_CODE,
                        format!("Request {reference} this request depends on did not succeed"),
                        vec![json!(reference)],
                    ));
                }
                let relative_url = placeholder::substitute_url(&request.relative_url, &parent.body)
                    .map_err(|e| placeholder_rejection(request, e))?;
                let body = placeholder::substitute_body(&request.body, &parent.body)
                    .map_err(|e| placeholder_rejection(request, e))?;
                (relative_url, body)
            }
        };

        let Some(route) = self.routes.resolve(&request.method, &relative_url) else {
            return Err(reject(
                request,
                StatusCode::NOT_FOUND,
                ROUTE_NOT_FOUND_CODE,
                format!("No command for {} {}", request.method, relative_url),
                Vec::new(),
            ));
        };

        let payload = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(&body).map_err(|e| {
                reject(
                    request,
                    StatusCode::BAD_REQUEST,
                    BODY_INVALID_CODE,
                    format!("Request body is not valid JSON: {e}"),
                    Vec::new(),
                )
            })?
        };

        let mut command = CommandDescriptor::new(route.action_name, route.entity_name)
            .with_href(relative_url)
            .with_payload(payload);
        command.entity_id = route.entity_id;

        let mut submission = CommandRequest::new(command, principal.clone());
        submission.idempotency_key = request.idempotency_key().map(str::to_string);
        Ok(submission)
    }
}

/// Echo the item's idempotency key back to the caller.
fn response_headers(request: &BatchRequest) -> Vec<Header> {
    request
        .idempotency_key()
        .map(|key| vec![Header::new(IDEMPOTENCY_KEY_HEADER, key)])
        .unwrap_or_default()
}

fn respond(
    request: &BatchRequest,
    submitted: Result<CommandAttempt, AdmissionError>,
) -> BatchResponse {
    match submitted {
        Ok(record) => BatchResponse {
            request_id: request.request_id,
            status_code: record
                .result_status_code
                .unwrap_or(StatusCode::OK.as_u16()),
            headers: response_headers(request),
            body: record
                .outcome_body()
                .unwrap_or_else(|| json!({ "commandId": record.id })),
        },
        Err(error) => error_response(request, &translate_error(&error)),
    }
}

fn error_response(request: &BatchRequest, info: &ErrorInfo) -> BatchResponse {
    BatchResponse {
        request_id: request.request_id,
        status_code: info.status_code,
        headers: response_headers(request),
        body: info.to_body(),
    }
}

fn reject(
    request: &BatchRequest,
    status: StatusCode,
    code: &str,
    message: String,
    parameters: Vec<Value>,
) -> BatchResponse {
    let info = ErrorInfo::new(status, code, message, ErrorCategory::Permanent)
        .with_parameters(parameters);
    error_response(request, &info)
}

fn placeholder_rejection(request: &BatchRequest, error: PlaceholderError) -> BatchResponse {
    let code = match error {
        PlaceholderError::InvalidBody(_) => BODY_INVALID_CODE,
        PlaceholderError::Unresolved(_) => PLACEHOLDER_UNRESOLVED_CODE,
    };
    reject(
        request,
        StatusCode::BAD_REQUEST,
        code,
        error.to_string(),
        Vec::new(),
    )
}

fn storage_error(error: LedgerError) -> ErrorInfo {
    translate_error(&AdmissionError::StorageUnavailable(error))
}

fn answer_all(requests: &[BatchRequest], info: &ErrorInfo) -> Vec<BatchResponse> {
    requests
        .iter()
        .map(|request| error_response(request, info))
        .collect()
}

#[cfg(test)]
mod tests;
