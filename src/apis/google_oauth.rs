use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, RedirectUrl,
    RefreshToken, Scope, TokenResponse as _, TokenUrl,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_http::Response;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::GoogleAuthConfig;
use crate::utils;

pub type Token = BasicTokenResponse;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPE_SPREADSHEETS: &str = "https://www.googleapis.com/auth/spreadsheets";
const SCOPE_ANALYTICS_READONLY: &str = "https://www.googleapis.com/auth/analytics.readonly";

/// A token as cached on disk, along with the time it was obtained so that
/// expiration can be checked without a round trip.
#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    token: Token,
    time_obtained: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        match self.token.expires_in() {
            Some(duration) => self.time_obtained + duration <= Utc::now(),
            // no expiration time reported; assume it is still valid
            None => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("the Google OAuth credentials were rejected")]
    Unauthorized(anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Runs an operation that requires a Google access token: first with the
/// cached token, then with a refreshed one, then with brand-new
/// credentials from an interactive authorization. Whichever token works is
/// cached back to the configured file, so repeat runs stay
/// non-interactive until the refresh token dies.
pub fn with_google_token<F, T>(auth: &GoogleAuthConfig, mut operation: F) -> anyhow::Result<T>
where
    F: FnMut(&Token) -> Result<T, CredentialsError>,
{
    // attempt to run the operation with a cached token
    let expired_token = match read_cached_token(auth) {
        Some(cached) if !cached.is_expired() => {
            trace!("using the cached Google token");
            match operation(&cached.token) {
                // nothing was refreshed, so there is no need to cache again
                Ok(result) => return Ok(result),
                Err(CredentialsError::Unauthorized(e)) => {
                    debug!("the cached Google token was rejected: {}", e);
                    Some(cached)
                }
                // the problem was not with the credentials
                Err(CredentialsError::Other(e)) => return Err(e),
            }
        }
        Some(cached) => {
            debug!("the cached Google token is expired");
            Some(cached)
        }
        None => None,
    };

    // attempt to refresh and run again
    'refresh: {
        let Some(refresh_token) = expired_token.as_ref().and_then(|c| c.token.refresh_token())
        else {
            debug!("no refresh token to try");
            break 'refresh;
        };
        trace!("refreshing the Google token");
        let refreshed = match refresh_token_grant(auth, refresh_token) {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!("failed to refresh the Google token: {}", e);
                break 'refresh;
            }
        };
        match operation(&refreshed.token) {
            Ok(result) => {
                write_cached_token(auth, &refreshed)?;
                return Ok(result);
            }
            Err(CredentialsError::Unauthorized(e)) => {
                debug!("the refreshed Google token was rejected: {}", e);
            }
            Err(CredentialsError::Other(e)) => return Err(e),
        }
    }

    // last resort: a fresh interactive authorization
    trace!("requesting fresh Google credentials");
    let fresh = authorize_interactively(auth)?;
    match operation(&fresh.token) {
        Ok(result) => {
            write_cached_token(auth, &fresh)?;
            Ok(result)
        }
        Err(CredentialsError::Unauthorized(e)) => {
            Err(e.context("Google rejected even freshly issued credentials"))
        }
        Err(CredentialsError::Other(e)) => Err(e),
    }
}

fn read_cached_token(auth: &GoogleAuthConfig) -> Option<CachedToken> {
    let file = match File::open(&auth.token_cache) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no token cache at {}", auth.token_cache.display());
            return None;
        }
        Err(e) => {
            warn!("failed to open the token cache {}: {}", auth.token_cache.display(), e);
            return None;
        }
    };
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(cached) => Some(cached),
        Err(e) => {
            warn!("failed to parse the token cache {}: {}", auth.token_cache.display(), e);
            None
        }
    }
}

fn write_cached_token(auth: &GoogleAuthConfig, token: &CachedToken) -> anyhow::Result<()> {
    debug!("caching the Google token to {}", auth.token_cache.display());
    let writer = BufWriter::new(File::create(&auth.token_cache)?);
    serde_json::to_writer(writer, token)?;
    Ok(())
}

fn refresh_token_grant(
    auth: &GoogleAuthConfig,
    refresh_token: &RefreshToken,
) -> anyhow::Result<CachedToken> {
    let time_obtained = Utc::now();
    let mut token = oauth2_client(auth)
        .exchange_refresh_token(refresh_token)
        .request(oauth2::reqwest::http_client)?;
    // Google does not echo the refresh token back on a refresh grant
    token.set_refresh_token(Some(refresh_token.clone()));
    Ok(CachedToken { token, time_obtained })
}

fn authorize_interactively(auth: &GoogleAuthConfig) -> anyhow::Result<CachedToken> {
    // expiry is measured from before the exchange, not after
    let time_obtained = Utc::now();

    // listen on any free port for the authorization redirect
    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let listener = TcpListener::bind(addr)?;
    let port = listener.local_addr()?.port();

    let client = oauth2_client(auth).set_redirect_uri(
        RedirectUrl::new(format!("http://localhost:{port}"))
            .expect("hardcoded URL should be valid"),
    );
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_token) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(SCOPE_SPREADSHEETS.to_owned()))
        .add_scope(Scope::new(SCOPE_ANALYTICS_READONLY.to_owned()))
        .set_pkce_challenge(pkce_challenge)
        .url();

    utils::open_url(auth_url.as_str());
    let code = listen_for_code(listener, csrf_token)?;

    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request(oauth2::reqwest::http_client)?;

    Ok(CachedToken { token, time_obtained })
}

fn listen_for_code(listener: TcpListener, csrf_token: CsrfToken) -> anyhow::Result<String> {
    let server = tiny_http::Server::from_listener(listener, None)
        .map_err(|e| anyhow!("failed to start the redirect listener: {e}"))?;

    'request_loop: for request in server.incoming_requests() {
        // prepend a dummy scheme and host so the path can be parsed
        let url = format!("http://localhost{}", request.url());
        let Ok(url) = Url::parse(&url) else {
            warn!("failed to parse the path of a redirect request: {}", request.url());
            continue 'request_loop;
        };

        // browsers also ask for things like /favicon.ico
        if url.path() != "/" {
            let _ = request.respond(Response::empty(reqwest::StatusCode::NO_CONTENT.as_u16()));
            continue 'request_loop;
        }

        let mut code = None;
        let mut state_matches = false;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state_matches = *csrf_token.secret() == value,
                _ => {}
            }
        }
        if !state_matches {
            // the redirect must echo the state we generated to be trusted
            warn!("an authorization redirect arrived with a bad state; ignoring it");
            respond_or_warn(request, "Authorization rejected: state mismatch. Try again.");
            continue 'request_loop;
        }
        let Some(code) = code else {
            respond_or_warn(request, "No authorization code in the redirect. Try again.");
            continue 'request_loop;
        };
        respond_or_warn(request, "Authorization received. You can close this window.");
        return Ok(code);
    }

    Err(anyhow!("the redirect listener stopped before an authorization code arrived"))
}

fn respond_or_warn(request: tiny_http::Request, message: &str) {
    if let Err(e) = request.respond(Response::from_string(message)) {
        warn!("failed to respond to a redirect request: {}", e);
    }
}

fn oauth2_client(auth: &GoogleAuthConfig) -> BasicClient {
    BasicClient::new(
        ClientId::new(auth.client_id.clone()),
        Some(ClientSecret::new(auth.client_secret.clone())),
        AuthUrl::new(AUTH_URL.to_owned()).expect("hardcoded URL should be valid"),
        Some(TokenUrl::new(TOKEN_URL.to_owned()).expect("hardcoded URL should be valid")),
    )
}
