/*
[INPUT]:  Host, origin security flag, stream purpose, optional bearer token
[OUTPUT]: Fully resolved WebSocket URL
[POS]:    WebSocket layer - endpoint resolution
[UPDATE]: When adding stream paths or changing query parameters
*/

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

const TRADING_PATH: &str = "/ws/trading";
const MARKET_PATH_PREFIX: &str = "/ws/market";
const ACCOUNT_PATH_PREFIX: &str = "/ws/trades";
const TOKEN_QUERY_PARAM: &str = "token";

/// Which stream on the backend a connection is for
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamPath {
    /// Platform-wide trading stream
    #[default]
    Trading,
    /// Per-symbol market stream
    Market { symbol: String },
    /// Per-account trade stream
    Account { account_id: String },
    Custom { path: String },
}

impl StreamPath {
    pub fn path(&self) -> String {
        match self {
            StreamPath::Trading => TRADING_PATH.to_string(),
            StreamPath::Market { symbol } => format!("{MARKET_PATH_PREFIX}/{symbol}"),
            StreamPath::Account { account_id } => format!("{ACCOUNT_PATH_PREFIX}/{account_id}"),
            StreamPath::Custom { path } if path.starts_with('/') => path.clone(),
            StreamPath::Custom { path } => format!("/{path}"),
        }
    }
}

/// Where a stream connects to.
///
/// `secure` mirrors the hosting origin: a secure origin must use `wss`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_secure")]
    pub secure: bool,
    #[serde(default)]
    pub stream: StreamPath,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, secure: bool, stream: StreamPath) -> Self {
        Self {
            host: host.into(),
            secure,
            stream,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// Build the connect URL, appending the token as a query parameter
    pub fn url(&self, auth_token: Option<&str>) -> Result<Url> {
        let raw = format!("{}://{}{}", self.scheme(), self.host, self.stream.path());
        let mut url = Url::parse(&raw)?;
        if let Some(token) = auth_token.filter(|token| !token.is_empty()) {
            url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        }
        Ok(url)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost:8080", false, StreamPath::Trading)
    }
}

fn default_secure() -> bool {
    true
}
