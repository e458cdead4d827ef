use super::{ApiError, ApiRequest, ApiResponse, ApiResult, Transport};
use futures::future::{FutureExt, LocalBoxFuture};

/// `reqwest`-backed transport against the profile backend.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_auth_headers(
        mut req: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }
}

pub(crate) fn parse_body(text: String) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

impl Transport for HttpTransport {
    fn send(&self, req: ApiRequest) -> LocalBoxFuture<'static, ApiResult<ApiResponse>> {
        let client = self.client.clone();
        let url = format!("{}{}", self.base_url, req.path);

        async move {
            let mut builder = client.request(req.method, url);
            builder = Self::with_auth_headers(builder, req.bearer.as_deref());

            if let Some(b) = &req.body {
                builder = builder.json(b);
            }

            let res = builder.send().await.map_err(ApiError::network)?;
            let status = res.status().as_u16();
            let text = res.text().await.map_err(ApiError::network)?;

            Ok(ApiResponse {
                status,
                body: parse_body(text),
            })
        }
        .boxed_local()
    }
}
