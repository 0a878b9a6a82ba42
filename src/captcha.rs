use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{LifecycleError, Result};

const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Anti-automation proof check. `Ok(false)` means the proof was rejected;
/// `Err` means the service could not be asked. Callers treat both as failure.
pub trait CaptchaVerifier: Send + Sync {
    fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool>;
}

#[derive(Serialize)]
struct SiteVerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct TurnstileVerifier {
    secret: String,
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl TurnstileVerifier {
    pub fn new(secret: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LifecycleError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            secret: secret.into(),
            endpoint: TURNSTILE_VERIFY_URL.to_string(),
            client,
        })
    }

    /// Points the verifier somewhere other than Cloudflare.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl CaptchaVerifier for TurnstileVerifier {
    fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool> {
        if token.trim().is_empty() {
            return Ok(false);
        }

        let request = SiteVerifyRequest {
            secret: &self.secret,
            response: token,
            remoteip: remote_ip,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .form(&request)
            .send()
            .map_err(|e| LifecycleError::ExternalService(format!("CAPTCHA request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(LifecycleError::ExternalService(format!(
                "CAPTCHA service returned {}",
                response.status()
            )));
        }

        let body: SiteVerifyResponse = response.json().map_err(|e| {
            LifecycleError::ExternalService(format!("CAPTCHA response unreadable: {}", e))
        })?;

        if body.success {
            debug!("captcha accepted");
        } else {
            warn!(codes = ?body.error_codes, "captcha rejected");
        }
        Ok(body.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(reply.as_bytes()).unwrap();
        });
        format!("http://{}/siteverify", addr)
    }

    #[test]
    fn test_empty_token_is_rejected_without_a_request() {
        let verifier = TurnstileVerifier::new("secret", Duration::from_secs(1))
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/unreachable");
        assert!(!verifier.verify("  ", None).unwrap());
    }

    #[test]
    fn test_success_flag_is_honoured() {
        let endpoint = serve_once(r#"{"success":true}"#);
        let verifier = TurnstileVerifier::new("secret", Duration::from_secs(5))
            .unwrap()
            .with_endpoint(endpoint);
        assert!(verifier.verify("token", Some("203.0.113.9")).unwrap());
    }

    #[test]
    fn test_rejection_is_reported_as_false() {
        let endpoint = serve_once(r#"{"success":false,"error-codes":["invalid-input-response"]}"#);
        let verifier = TurnstileVerifier::new("secret", Duration::from_secs(5))
            .unwrap()
            .with_endpoint(endpoint);
        assert!(!verifier.verify("token", None).unwrap());
    }

    #[test]
    fn test_silent_service_times_out_as_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/siteverify", listener.local_addr().unwrap());
        let verifier = TurnstileVerifier::new("secret", Duration::from_millis(200))
            .unwrap()
            .with_endpoint(endpoint);
        let result = verifier.verify("token", None);
        assert!(matches!(result, Err(LifecycleError::ExternalService(_))));
        drop(listener);
    }
}
