//! HTTP and HTTPS communicator

use async_trait::async_trait;
use reqwest::{redirect, Client, Method};
use std::error::Error as _;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, instrument};

use honeysift_common::{
    CommunicatorOptions, ProbeError, ProbeResult, Protocol, ProtocolCommunicator, SignatureStep,
    StepOutcome, StepRun,
};

use crate::matcher::matches_step;

/// Client shared by the HTTP communicators and the timing probe.
///
/// Certificate validation is off: honeypots ship self-signed certificates.
pub fn build_client(connect_timeout: Duration, request_timeout: Duration) -> ProbeResult<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .danger_accept_invalid_certs(true)
        .redirect(redirect::Policy::limited(5))
        .build()
        .map_err(|e| ProbeError::Configuration(format!("http client: {e}")))
}

/// Base URL for a host and port, bracketing IPv6 literals.
pub fn base_url(https: bool, host: IpAddr, port: u16) -> String {
    let scheme = if https { "https" } else { "http" };
    format!("{scheme}://{}", SocketAddr::new(host, port))
}

pub fn map_reqwest_error(err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::timeout(err.to_string());
    }
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return ProbeError::from_io(io);
        }
        source = inner.source();
    }
    if err.is_connect() {
        ProbeError::Unreachable(err.to_string())
    } else if err.is_body() || err.is_decode() {
        ProbeError::protocol(err.to_string())
    } else {
        ProbeError::Io(err.to_string())
    }
}

fn method_for(step: &SignatureStep) -> Option<Method> {
    match step.method.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("get") => Some(Method::GET),
        Some("post") => Some(Method::POST),
        _ => None,
    }
}

/// Issues each step as a request for the step's input path.
pub struct HttpCommunicator {
    client: Client,
    https: bool,
    body_limit: usize,
}

impl HttpCommunicator {
    pub fn new(options: &CommunicatorOptions, https: bool) -> ProbeResult<Self> {
        Ok(Self {
            client: build_client(options.connect_timeout(), options.http_timeout())?,
            https,
            body_limit: options.http_body_limit,
        })
    }

    /// Read the body in chunks, stopping at the size limit.
    async fn read_body(&self, response: &mut reqwest::Response) -> ProbeResult<Vec<u8>> {
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            let room = self.body_limit.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl ProtocolCommunicator for HttpCommunicator {
    #[instrument(skip(self, steps), fields(steps = steps.len(), https = self.https))]
    async fn execute(&self, host: IpAddr, port: u16, steps: &[SignatureStep]) -> StepRun {
        let base = base_url(self.https, host, port);
        let mut outcomes = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            // Reported once when the signatures are loaded.
            if let Some(reason) = step.http_request_problem() {
                debug!("Skipping HTTP step {}: {}", index, reason);
                outcomes.push(StepOutcome::skipped(index));
                continue;
            }
            let (Some(method), Some(expected_code)) = (method_for(step), step.response_code) else {
                outcomes.push(StepOutcome::skipped(index));
                continue;
            };

            let url = format!("{base}{}", String::from_utf8_lossy(step.input.as_bytes()));
            let mut response = match self.client.request(method, &url).send().await {
                Ok(response) => response,
                Err(e) => return StepRun::aborted(outcomes, map_reqwest_error(e)),
            };

            let status = response.status().as_u16();
            let body = match self.read_body(&mut response).await {
                Ok(body) => body,
                Err(e) => return StepRun::aborted(outcomes, e),
            };

            let matched = status == expected_code && matches_step(step, &body);
            debug!("{} -> {} ({} bytes), matched={}", url, status, body.len(), matched);
            outcomes.push(StepOutcome::new(index, matched, body).with_status(status));
        }

        StepRun::completed(outcomes)
    }

    fn protocol(&self) -> Protocol {
        if self.https {
            Protocol::Https
        } else {
            Protocol::Http
        }
    }
}
