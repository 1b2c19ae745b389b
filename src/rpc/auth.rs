//! Authorization headers for the JSON-RPC endpoints (chain node and hub).

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RpcAuth {
    #[default]
    None,
    Basic {
        user: String,
        password: String,
    },
    /// Token issued by the hub after the client authenticated its address.
    Bearer(String),
}

impl RpcAuth {
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        RpcAuth::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        RpcAuth::Bearer(token.into())
    }

    pub(crate) fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = match self {
            RpcAuth::None => return Ok(headers),
            RpcAuth::Basic { user, password } => {
                let encoded = BASE64_STANDARD.encode(format!("{user}:{password}"));
                format!("Basic {encoded}")
            }
            RpcAuth::Bearer(token) => format!("Bearer {token}"),
        };
        let value =
            HeaderValue::from_str(&value).context("failed to build Authorization header")?;
        headers.insert("Authorization", value);
        Ok(headers)
    }
}
