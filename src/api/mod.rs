mod http;

pub use http::HttpTransport;

use crate::auth::AuthRetryWrapper;
use crate::models::{Link, LinkKind, ProfileDraft};
use crate::reorder::ReorderEntry;
use futures::future::LocalBoxFuture;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// A `401` that was not recovered by the retry wrapper.
    Unauthorized,
    /// Credentials are gone; the editor must route to sign-in.
    AuthExpired,
    Network,
    Http,
    Parse,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub(crate) fn network(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            status: None,
            message: e.to_string(),
        }
    }

    pub(crate) fn parse(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            status: None,
            message: e.to_string(),
        }
    }

    pub(crate) fn unauthorized() -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            status: Some(401),
            message: "Unauthorized".to_string(),
        }
    }

    pub(crate) fn auth_expired() -> Self {
        Self {
            kind: ApiErrorKind::AuthExpired,
            status: None,
            message: "Session expired".to_string(),
        }
    }

    pub(crate) fn http(status: u16, body: &serde_json::Value, ctx: &str) -> Self {
        let body = match body {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            kind: ApiErrorKind::Http,
            status: Some(status),
            message: format!("{ctx} ({status}): {body}"),
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        self.kind == ApiErrorKind::AuthExpired
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A backend call before credentials are attached.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON; `Null` for empty bodies, a string for non-JSON bodies.
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// The wire. Resolves with any HTTP status; only connection failures are errors.
pub trait Transport {
    fn send(&self, req: ApiRequest) -> LocalBoxFuture<'static, ApiResult<ApiResponse>>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CreateLinkRequest {
    pub title: String,
    pub url: String,
    pub kind: LinkKind,
    pub position: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LinkPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Partial update of `/profiles/me`. Absent fields are left untouched by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_icons: Option<serde_json::Value>,
}

/// Typed backend endpoints. Every call goes through the auth retry wrapper.
#[derive(Clone)]
pub struct ApiClient {
    auth: Rc<AuthRetryWrapper>,
}

impl ApiClient {
    pub fn new(auth: Rc<AuthRetryWrapper>) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &Rc<AuthRetryWrapper> {
        &self.auth
    }

    async fn request_json(&self, req: ApiRequest, ctx: &str) -> ApiResult<serde_json::Value> {
        let res = self.auth.authed_fetch(req).await?;
        if res.is_success() {
            Ok(res.body)
        } else if res.is_unauthorized() {
            Err(ApiError::unauthorized())
        } else {
            Err(ApiError::http(res.status, &res.body, ctx))
        }
    }

    pub async fn fetch_profile(&self) -> ApiResult<ProfileDraft> {
        let data = self
            .request_json(ApiRequest::get("/profiles/me"), "Load profile failed")
            .await?;
        Self::parse_profile_response(data)
    }

    pub async fn update_profile(&self, patch: &ProfilePatch) -> ApiResult<serde_json::Value> {
        let body = serde_json::to_value(patch).map_err(ApiError::parse)?;
        self.request_json(
            ApiRequest::patch("/profiles/me", body),
            "Update profile failed",
        )
        .await
    }

    /// Create a link and return the server-assigned id plus the stored link when echoed.
    pub async fn create_link(&self, req: &CreateLinkRequest) -> ApiResult<(u64, Option<Link>)> {
        let body = serde_json::to_value(req).map_err(ApiError::parse)?;
        let data = self
            .request_json(ApiRequest::post("/links", body), "Create link failed")
            .await?;

        let Some(id) = Self::parse_created_id(&data) else {
            return Err(ApiError::parse(format!(
                "Create link succeeded but response is missing link id: {data}"
            )));
        };
        Ok((id, Self::parse_link_response(&data)))
    }

    pub async fn update_link(&self, id: u64, patch: &LinkPatch) -> ApiResult<Option<Link>> {
        let body = serde_json::to_value(patch).map_err(ApiError::parse)?;
        let data = self
            .request_json(
                ApiRequest::patch(format!("/links/{id}"), body),
                "Update link failed",
            )
            .await?;
        Ok(Self::parse_link_response(&data))
    }

    pub async fn delete_link(&self, id: u64) -> ApiResult<()> {
        self.request_json(ApiRequest::delete(format!("/links/{id}")), "Delete link failed")
            .await
            .map(|_| ())
    }

    /// The only persistence path for link order: the whole mapping in one call.
    pub async fn reorder_links(&self, entries: &[ReorderEntry]) -> ApiResult<()> {
        let body = serde_json::to_value(entries).map_err(ApiError::parse)?;
        self.request_json(
            ApiRequest::patch("/links/reorder", body),
            "Reorder links failed",
        )
        .await
        .map(|_| ())
    }

    fn unwrap_envelope<'a>(data: &'a serde_json::Value, key: &str) -> &'a serde_json::Value {
        data.get(key)
            .filter(|v| v.is_object())
            .or_else(|| data.get("data").filter(|v| v.is_object()))
            .unwrap_or(data)
    }

    pub(crate) fn parse_profile_response(data: serde_json::Value) -> ApiResult<ProfileDraft> {
        let profile = Self::unwrap_envelope(&data, "profile").clone();
        let mut draft: ProfileDraft = serde_json::from_value(profile).map_err(ApiError::parse)?;
        draft.normalize_order();
        Ok(draft)
    }

    pub(crate) fn parse_link_response(data: &serde_json::Value) -> Option<Link> {
        let link = Self::unwrap_envelope(data, "link");
        serde_json::from_value::<Link>(link.clone()).ok()
    }

    // Backend response has been observed with different shapes; accept a few common forms.
    pub(crate) fn parse_created_id(data: &serde_json::Value) -> Option<u64> {
        let link = Self::unwrap_envelope(data, "link");
        let id = link
            .get("id")
            .or_else(|| link.get("linkId"))
            .or_else(|| data.get("id"))?;
        id.as_u64()
            .or_else(|| id.as_str().and_then(|s| s.trim().parse().ok()))
    }

    /// Value of one profile field as echoed by `PATCH /profiles/me`, if present.
    pub(crate) fn echoed_profile_field(
        data: &serde_json::Value,
        json_key: &str,
    ) -> Option<serde_json::Value> {
        Self::unwrap_envelope(data, "profile").get(json_key).cloned()
    }
}
