use super::{BoxFuture, Response, Transport};
use std::collections::HashMap;

const CONTENT_TYPE: &str = "application/json";
const EVENTS_PATH: &str = "/v1/events";
const USER_AGENT: &str = concat!("jobtrail-rust/", env!("CARGO_PKG_VERSION"));

/// HTTP transport that POSTs event batches to `{base_url}/v1/events`.
#[derive(Clone, Debug)]
pub(crate) struct HttpTransport {
    url: String,
    client: reqwest::Client,
    api_key: String,
    headers: HashMap<String, String>,
}

/// Configuration used to construct an HttpTransport from client settings.
pub(crate) struct TransportConfig {
    pub api_key: String,
    pub headers: HashMap<String, String>,
    pub http_client: Option<reqwest::Client>,
}

impl HttpTransport {
    pub fn new(base_url: &str, config: TransportConfig) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let client = config.http_client.unwrap_or_else(reqwest::Client::new);

        Self {
            url: format!("{}{}", base_url, EVENTS_PATH),
            client,
            api_key: config.api_key,
            headers: config.headers,
        }
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req = req
            .header("Content-Type", CONTENT_TYPE)
            .header("Accept", CONTENT_TYPE)
            .header("User-Agent", USER_AGENT)
            .header("Authorization", format!("Bearer {}", self.api_key));

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        req
    }

    async fn do_post(&self, body: serde_json::Value) -> crate::Result<Response> {
        let req = self.apply_headers(self.client.post(&self.url).json(&body));
        let response = req.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(Response { status, body })
    }
}

impl Transport for HttpTransport {
    fn post(&self, body: serde_json::Value) -> BoxFuture<'_, crate::Result<Response>> {
        Box::pin(self.do_post(body))
    }
}
