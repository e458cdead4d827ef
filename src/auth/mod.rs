//! Bearer-token session and the single retry-on-401 path.
//!
//! Every authenticated call goes through [`AuthRetryWrapper::authed_fetch`].
//! A `401` triggers at most one token refresh for the whole session at a time;
//! concurrent failures join the refresh already in flight and each original
//! request is replayed exactly once.

use crate::api::{ApiError, ApiRequest, ApiResponse, ApiResult, Transport};
use crate::storage::TokenStore;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct TokenResponse {
    #[serde(alias = "access_token", alias = "accessToken", alias = "token")]
    access: String,
    #[serde(default, alias = "refresh_token", alias = "refreshToken")]
    refresh: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct TokenRequest {
    email: String,
    password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

type RefreshFuture = Shared<LocalBoxFuture<'static, Result<String, ApiError>>>;

/// Credentials plus the shared refresh slot. One per editor tab.
pub struct Session {
    credentials: RefCell<Option<Credentials>>,
    refresh_in_flight: RefCell<Option<RefreshFuture>>,
    expired: Cell<bool>,
    store: Box<dyn TokenStore>,
}

impl Session {
    /// Restore whatever credentials the store holds.
    pub fn new(store: Box<dyn TokenStore>) -> Rc<Self> {
        let credentials = store.load();
        Rc::new(Self {
            credentials: RefCell::new(credentials),
            refresh_in_flight: RefCell::new(None),
            expired: Cell::new(false),
            store,
        })
    }

    pub fn with_credentials(credentials: Credentials, store: Box<dyn TokenStore>) -> Rc<Self> {
        store.save(&credentials);
        Rc::new(Self {
            credentials: RefCell::new(Some(credentials)),
            refresh_in_flight: RefCell::new(None),
            expired: Cell::new(false),
            store,
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.credentials
            .borrow()
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.credentials
            .borrow()
            .as_ref()
            .map(|c| c.refresh_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.borrow().is_some()
    }

    /// True once a refresh failed; cleared by the next sign-in.
    pub fn is_expired(&self) -> bool {
        self.expired.get()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_in_flight.borrow().is_some()
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        self.store.save(&credentials);
        *self.credentials.borrow_mut() = Some(credentials);
        self.expired.set(false);
    }

    pub fn clear(&self) {
        self.credentials.borrow_mut().take();
        self.store.clear();
    }

    fn expire(&self) {
        if !self.expired.replace(true) {
            tracing::info!("session expired, credentials cleared");
        }
        self.clear();
    }
}

pub struct AuthRetryWrapper {
    session: Rc<Session>,
    transport: Rc<dyn Transport>,
}

impl AuthRetryWrapper {
    pub fn new(session: Rc<Session>, transport: Rc<dyn Transport>) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }

    /// `POST /token`: exchange a password for a fresh credential pair.
    pub async fn sign_in(&self, email: &str, password: &str) -> ApiResult<()> {
        let body = serde_json::to_value(TokenRequest {
            email: email.to_string(),
            password: password.to_string(),
        })
        .map_err(ApiError::parse)?;

        let res = self.transport.send(ApiRequest::post("/token", body)).await?;
        if res.is_unauthorized() {
            return Err(ApiError::unauthorized());
        }
        if !res.is_success() {
            return Err(ApiError::http(res.status, &res.body, "Sign in failed"));
        }

        let tokens: TokenResponse = serde_json::from_value(res.body).map_err(ApiError::parse)?;
        let Some(refresh) = tokens.refresh else {
            return Err(ApiError::parse("Sign in response is missing refresh token"));
        };
        self.session.set_credentials(Credentials::new(tokens.access, refresh));
        tracing::info!("signed in");
        Ok(())
    }

    pub fn sign_out(&self) {
        self.session.clear();
    }

    /// Send `req` with the current bearer token, recovering one expired token.
    pub async fn authed_fetch(&self, req: ApiRequest) -> ApiResult<ApiResponse> {
        let Some(token) = self.session.access_token() else {
            return Err(ApiError::auth_expired());
        };

        let res = self
            .transport
            .send(req.clone().with_bearer(&token))
            .await?;
        if !res.is_unauthorized() {
            return Ok(res);
        }

        // Another request may have refreshed while this one was on the wire.
        let fresh = match self.session.access_token() {
            Some(current) if current != token => current,
            _ => match self.refresh().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, path = %req.path, "token refresh failed");
                    self.session.expire();
                    return Err(ApiError::auth_expired());
                }
            },
        };

        tracing::debug!(path = %req.path, "replaying request with refreshed token");
        let replay = self.transport.send(req.with_bearer(&fresh)).await?;
        if replay.is_unauthorized() {
            self.session.expire();
            return Err(ApiError::auth_expired());
        }
        Ok(replay)
    }

    /// Join the refresh in flight or start the only one.
    fn refresh(&self) -> RefreshFuture {
        if let Some(in_flight) = self.session.refresh_in_flight.borrow().clone() {
            return in_flight;
        }

        let Some(refresh_token) = self.session.refresh_token() else {
            return futures::future::ready(Err(ApiError::auth_expired()))
                .boxed_local()
                .shared();
        };

        let session: Weak<Session> = Rc::downgrade(&self.session);
        let transport = self.transport.clone();
        let fut = async move {
            let result = request_refresh(transport.as_ref(), refresh_token.clone()).await;
            if let Some(s) = session.upgrade() {
                if let Ok(tokens) = &result {
                    s.set_credentials(Credentials::new(
                        tokens.access.clone(),
                        tokens.refresh.clone().unwrap_or(refresh_token),
                    ));
                }
                s.refresh_in_flight.borrow_mut().take();
            }
            result.map(|t| t.access)
        }
        .boxed_local()
        .shared();

        tracing::debug!("starting token refresh");
        *self.session.refresh_in_flight.borrow_mut() = Some(fut.clone());
        fut
    }
}

async fn request_refresh(
    transport: &dyn Transport,
    refresh_token: String,
) -> ApiResult<TokenResponse> {
    let body = serde_json::to_value(RefreshRequest { refresh_token }).map_err(ApiError::parse)?;
    let res = transport
        .send(ApiRequest::post("/token/refresh", body))
        .await?;
    if !res.is_success() {
        return Err(ApiError::http(res.status, &res.body, "Token refresh failed"));
    }
    serde_json::from_value(res.body).map_err(ApiError::parse)
}
