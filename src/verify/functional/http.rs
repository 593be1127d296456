//! HTTP checks through reqwest's blocking client

use reqwest::blocking::Client;
use reqwest::Method;
use std::io::Read;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use super::CheckOutcome;
use crate::models::evidence::{EvidencePayload, HttpResponse};
use crate::models::task::HttpCheck;
use crate::process::{CancellationToken, POLL_INTERVAL};

/// Body bytes kept as evidence
const MAX_BODY_EVIDENCE: usize = 4096;

/// Body bytes read for `expect_body_contains` matching
const MAX_BODY_READ: u64 = 1024 * 1024;

fn create_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .user_agent(concat!("proofgate/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Run one HTTP check. Connection failures, timeouts and cancellation
/// become an errored outcome, never an `Err`.
///
/// The request runs on a worker thread while this one watches `cancel`; a
/// cancelled check returns at once and the detached worker ends at its own
/// timeout.
pub fn run_http_check(
    check: &HttpCheck,
    timeout: Duration,
    cancel: &CancellationToken,
) -> CheckOutcome {
    if cancel.is_cancelled() {
        return errored(check, "cancelled before the request was sent".to_string());
    }

    let (tx, rx) = mpsc::channel();
    let request = check.clone();
    thread::spawn(move || {
        let _ = tx.send(send_request(&request, timeout));
    });

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(outcome) => return outcome,
            Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => {
                return errored(check, "cancelled while waiting for the response".to_string());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return errored(check, "HTTP worker exited without a response".to_string());
            }
        }
    }
}

fn send_request(check: &HttpCheck, timeout: Duration) -> CheckOutcome {
    let method = match Method::from_bytes(check.method.to_uppercase().as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return errored(check, format!("unsupported HTTP method '{}'", check.method));
        }
    };

    let client = match create_http_client(timeout) {
        Ok(client) => client,
        Err(e) => return errored(check, format!("failed to create HTTP client: {e}")),
    };

    let mut request = client.request(method, &check.url);
    for (name, value) in &check.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &check.body {
        request = request.body(body.clone());
    }

    let response = match request.send() {
        Ok(response) => response,
        Err(e) => {
            let reason = if e.is_timeout() {
                format!("request timed out after {}s", timeout.as_secs())
            } else if e.is_connect() {
                format!("connection failed: {e}")
            } else {
                format!("request failed: {e}")
            };
            return errored(check, reason);
        }
    };

    let status = response.status().as_u16();
    let mut bytes = Vec::new();
    if let Err(e) = response.take(MAX_BODY_READ).read_to_end(&mut bytes) {
        return errored(check, format!("failed to read response body: {e}"));
    }
    let body = String::from_utf8_lossy(&bytes).to_string();

    let status_ok = match check.expected_status {
        Some(expected) => status == expected,
        None => (200..300).contains(&status),
    };
    let body_ok = check
        .expect_body_contains
        .as_ref()
        .map(|needle| body.contains(needle.as_str()))
        .unwrap_or(true);

    let mut problems = Vec::new();
    if !status_ok {
        match check.expected_status {
            Some(expected) => problems.push(format!("status {status}, expected {expected}")),
            None => problems.push(format!("status {status}, expected 2xx")),
        }
    }
    if !body_ok {
        if let Some(needle) = &check.expect_body_contains {
            problems.push(format!("body does not contain '{needle}'"));
        }
    }

    let success = problems.is_empty();
    let message = if success {
        format!("{} {} -> {status}", check.method, check.url)
    } else {
        problems.join("; ")
    };

    CheckOutcome {
        name: check.name.clone(),
        kind: "http",
        success,
        error: None,
        message,
        payload: EvidencePayload::HttpResponse(HttpResponse {
            check: check.name.clone(),
            method: check.method.to_uppercase(),
            url: check.url.clone(),
            status: Some(status),
            body: truncate(&body, MAX_BODY_EVIDENCE),
            error: None,
            success,
        }),
    }
}

fn errored(check: &HttpCheck, error: String) -> CheckOutcome {
    CheckOutcome {
        name: check.name.clone(),
        kind: "http",
        success: false,
        error: Some(error.clone()),
        message: error.clone(),
        payload: EvidencePayload::HttpResponse(HttpResponse {
            check: check.name.clone(),
            method: check.method.to_uppercase(),
            url: check.url.clone(),
            status: None,
            body: String::new(),
            error: Some(error),
            success: false,
        }),
    }
}

/// Truncate on a char boundary
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}
