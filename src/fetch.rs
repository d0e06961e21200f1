//! Authenticated request execution
//!
//! Every call into the admin backend goes through [`SecureRequestExecutor`].
//! It attaches the bearer credential and the anti-forgery header, renews the
//! credential once on a 401 and retries once, and hands anything it cannot
//! recover from to the failure handler.

use std::sync::Arc;

use calendar_admin_auth::jwt;
use calendar_admin_auth::{AuthFailureHandler, SessionStore};
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::error::Error;

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

/// Options for a single logical request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub headers: HeaderMap,
    /// Attach the bearer credential (default `true`)
    pub auth: bool,
    /// Renew and retry once on a 401 (default `true`)
    pub auto_refresh: bool,
    /// Override for the anti-forgery header; `None` attaches it on
    /// POST/PUT/PATCH/DELETE only
    pub csrf: Option<bool>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            headers: HeaderMap::new(),
            auth: true,
            auto_refresh: true,
            csrf: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Add a header to the request. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add a JSON body to the request
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, Error> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Add a raw body to the request
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auth(mut self, value: bool) -> Self {
        self.auth = value;
        self
    }

    pub fn with_auto_refresh(mut self, value: bool) -> Self {
        self.auto_refresh = value;
        self
    }

    pub fn with_csrf(mut self, value: bool) -> Self {
        self.csrf = Some(value);
        self
    }
}

/// Request entry point for every authenticated caller
pub struct SecureRequestExecutor {
    client: Client,
    base_url: Url,
    session: SessionStore,
    failures: Arc<AuthFailureHandler>,
}

impl SecureRequestExecutor {
    pub fn new(
        client: Client,
        base_url: Url,
        session: SessionStore,
        failures: Arc<AuthFailureHandler>,
    ) -> Self {
        Self {
            client,
            base_url,
            session,
            failures,
        }
    }

    /// `target` is either an absolute URL or a path on the configured origin
    pub fn resolve(&self, target: &str) -> Result<Url, Error> {
        match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.base_url.join(target)?),
            Err(err) => Err(err.into()),
        }
    }

    /// Send a request.
    ///
    /// Returns the response as-is unless it is a 401/403 on an authenticated
    /// request. A 401 triggers one forced renewal and one retry. A 403, a
    /// second 401/403, or a failed renewal tears the session down and yields
    /// [`Error::Authentication`], which callers must treat as terminal.
    pub async fn execute(&self, target: &str, options: RequestOptions) -> Result<Response, Error> {
        let url = self.resolve(target)?;

        let token = if options.auth {
            match self.session.get_access_token().await {
                Some(token) => Some(token),
                None => {
                    debug!("No credential available for {}", target);
                    return Err(self.escalate(401, target));
                }
            }
        } else {
            None
        };

        let mut headers = options.headers.clone();
        if options.csrf.unwrap_or_else(|| is_state_changing(&options.method)) {
            self.session.csrf().apply_header(&mut headers, true);
        }

        let response = self
            .send(&url, &options, &headers, token.as_deref())
            .await
            .map_err(|err| self.reclassify(err, target, options.auth))?;

        let status = response.status().as_u16();
        if !options.auth || !is_auth_status(status) {
            return Ok(response);
        }

        if status == 401 && options.auto_refresh {
            debug!("401 from {}; renewing credential and retrying once", target);
            let fresh = match self.session.refresh_access_token(true).await {
                Some(fresh) => fresh,
                None => return Err(self.escalate(401, target)),
            };

            let retry = self
                .send(&url, &options, &headers, Some(&fresh))
                .await
                .map_err(|err| self.reclassify(err, target, true))?;

            let retry_status = retry.status().as_u16();
            if !is_auth_status(retry_status) {
                return Ok(retry);
            }
            return Err(self.escalate(retry_status, target));
        }

        Err(self.escalate(status, target))
    }

    /// Send a request and decode a successful JSON response
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<T, Error> {
        let response = self.execute(target, options).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http { status, body });
        }

        Ok(response.json::<T>().await?)
    }

    async fn send(
        &self,
        url: &Url,
        options: &RequestOptions,
        headers: &HeaderMap,
        token: Option<&str>,
    ) -> Result<Response, reqwest::Error> {
        let mut headers = headers.clone();
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let mut request = self
            .client
            .request(options.method.clone(), url.clone())
            .headers(headers);

        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        request.send().await
    }

    /// Transport failures stay transport failures unless the held credential
    /// is no longer structurally a bearer token
    fn reclassify(&self, err: reqwest::Error, target: &str, auth: bool) -> Error {
        let malformed = auth
            && self
                .session
                .peek_access_token()
                .map(|token| !jwt::is_well_formed(&token))
                .unwrap_or(false);

        if malformed {
            debug!("Transport error with a malformed credential: {}", err);
            self.escalate(401, target)
        } else {
            Error::Network(err)
        }
    }

    fn escalate(&self, status: u16, target: &str) -> Error {
        self.failures.handle_auth_error(status, Some(target));
        Error::authentication(status, target)
    }
}
