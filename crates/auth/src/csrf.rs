//! Anti-forgery token persisted as a same-site cookie

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cookie::{Cookie, SameSite};
use log::{debug, error, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::options::SessionOptions;
use crate::random::SecureRandom;
use crate::storage::KeyValueStore;

const TOKEN_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const MIN_TOKEN_LENGTH: usize = 32;

/// Generates, persists and reads the anti-forgery token.
///
/// The token lives in the cookie area of storage as a serialized `Set-Cookie`
/// string. It is stable for as long as the cookie lives and is not tied to the
/// access token.
#[derive(Clone)]
pub struct AntiForgeryTokenStore {
    cookies: Arc<dyn KeyValueStore>,
    random: Arc<dyn SecureRandom>,
    clock: Arc<dyn Clock>,
    cookie_name: String,
    header_name: String,
    token_length: usize,
    max_age: time::Duration,
    secure: bool,
}

impl AntiForgeryTokenStore {
    /// `secure` marks the cookie `Secure`; pass `true` for https origins.
    pub fn new(
        cookies: Arc<dyn KeyValueStore>,
        random: Arc<dyn SecureRandom>,
        clock: Arc<dyn Clock>,
        options: &SessionOptions,
        secure: bool,
    ) -> Self {
        let max_age = time::Duration::try_from(options.csrf_cookie_max_age)
            .unwrap_or(time::Duration::days(180));

        Self {
            cookies,
            random,
            clock,
            cookie_name: options.csrf_cookie_name.clone(),
            header_name: options.csrf_header_name.clone(),
            token_length: options.csrf_token_length.max(MIN_TOKEN_LENGTH),
            max_age,
            secure,
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Current token, or `None` when no live cookie exists. Never creates one.
    pub fn get_token(&self) -> Option<String> {
        let raw = match self.cookies.get(&self.cookie_name) {
            Ok(raw) => raw?,
            Err(err) => {
                error!("Failed to read anti-forgery cookie: {}", err);
                return None;
            }
        };

        let cookie = Cookie::parse(raw).ok()?;
        if cookie.value().is_empty() {
            return None;
        }

        if let Some(expires) = cookie.expires_datetime() {
            if expires <= self.now() {
                return None;
            }
        }

        Some(cookie.value().to_string())
    }

    /// Current token, generating and persisting a new one if none exists
    pub fn ensure_token(&self) -> String {
        if let Some(token) = self.get_token() {
            return token;
        }

        let token = self.generate_token();
        let cookie = Cookie::build((self.cookie_name.clone(), token.clone()))
            .path("/")
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .max_age(self.max_age)
            .expires(self.now() + self.max_age)
            .build();

        if let Err(err) = self.cookies.set(&self.cookie_name, &cookie.to_string()) {
            error!("Failed to persist anti-forgery cookie: {}", err);
        } else {
            debug!("Issued new anti-forgery token");
        }

        token
    }

    /// Expire the cookie immediately
    pub fn clear_token(&self) {
        let mut cookie = Cookie::build((self.cookie_name.clone(), ""))
            .path("/")
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .build();
        cookie.make_removal();

        if let Err(err) = self.cookies.set(&self.cookie_name, &cookie.to_string()) {
            error!("Failed to expire anti-forgery cookie: {}", err);
        }
    }

    /// The `Set-Cookie` string last written, for hosts that mirror the cookie
    /// into an HTTP cookie jar
    pub fn cookie_header(&self) -> Option<String> {
        self.cookies.get(&self.cookie_name).ok().flatten()
    }

    /// Attach the token header. With `force` a token is created if missing;
    /// otherwise a missing token leaves `headers` untouched.
    pub fn apply_header(&self, headers: &mut HeaderMap, force: bool) -> Option<String> {
        let token = if force {
            Some(self.ensure_token())
        } else {
            self.get_token()
        }?;

        let name = match HeaderName::try_from(self.header_name.as_str()) {
            Ok(name) => name,
            Err(err) => {
                error!("Invalid anti-forgery header name {:?}: {}", self.header_name, err);
                return None;
            }
        };
        let value = HeaderValue::from_str(&token).ok()?;
        headers.insert(name, value);

        Some(token)
    }

    fn now(&self) -> OffsetDateTime {
        let nanos = i128::from(self.clock.now_millis()) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    fn generate_token(&self) -> String {
        let mut bytes = vec![0u8; self.token_length];

        if let Err(err) = self.random.fill_bytes(&mut bytes) {
            warn!(
                "Secure random source unavailable ({}); anti-forgery token generated with a time-seeded PRNG",
                err
            );
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
                ^ u64::from(std::process::id()).rotate_left(32);
            StdRng::seed_from_u64(seed).fill_bytes(&mut bytes);
        }

        bytes
            .iter()
            .map(|b| TOKEN_ALPHABET[usize::from(b & 0x3f)] as char)
            .collect()
    }
}
