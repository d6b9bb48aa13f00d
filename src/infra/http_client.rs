use crate::app::ports::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::error::TransportError;
use reqwest::blocking::Client;

/// Blocking reqwest transport. The per-request timeout comes from the
/// request itself so each source can carry its own.
pub struct ReqwestHttp {
    client: Client,
}

impl ReqwestHttp {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(crate::constants::USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestHttp {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url).query(&request.params),
            Method::Post => self.client.post(&request.url).json(&request.params),
        };
        let resp = builder
            .timeout(request.timeout)
            .send()
            .map_err(classify)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().map_err(classify)?.to_vec();
        Ok(HttpResponse { status, bytes })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    // reqwest includes the URL in its messages; strip it so query-string keys stay out of logs.
    let (timeout, connect) = (e.is_timeout(), e.is_connect());
    let message = e.without_url().to_string();
    if timeout {
        TransportError::Timeout(message)
    } else if connect {
        TransportError::Connect(message)
    } else {
        TransportError::Other(message)
    }
}
