use serde::{Deserialize, de::DeserializeOwned};

mod bunny;
pub use bunny::*;

mod credentials;

mod videos;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("{context} ({status}: {message})")]
    Http {
        context: String,
        status: u16,
        message: String,
    },
    /// The function ran and threw
    #[error("{0}")]
    Function(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}
impl ApiError {
    /// Returns true if this error is due to a network connectivity issue
    pub fn is_network_error(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}
impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Query,
    Mutation,
    Action,
}
impl FunctionKind {
    fn endpoint(self) -> &'static str {
        match self {
            FunctionKind::Query => "query",
            FunctionKind::Mutation => "mutation",
            FunctionKind::Action => "action",
        }
    }
}

/// Client for the hosted backend's HTTP function API.
///
/// Every call is made on behalf of the user whose token it carries.
pub struct ConvexClient {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}
impl ConvexClient {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        kind: FunctionKind,
        path: &str,
        args: serde_json::Value,
    ) -> Result<T, ApiError> {
        #[derive(Deserialize)]
        #[serde(tag = "status", rename_all = "camelCase")]
        enum FunctionResponse {
            Success {
                value: serde_json::Value,
            },
            #[serde(rename_all = "camelCase")]
            Error {
                error_message: String,
            },
        }

        let mut request = self
            .client
            .post(format!("{}/api/{}", self.url, kind.endpoint()))
            .json(&serde_json::json!({
                "path": path,
                "args": args,
                "format": "json",
            }));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let response = check_for_response_success(response, path).await?;

        match response.json::<FunctionResponse>().await? {
            FunctionResponse::Success { value } => serde_json::from_value(value)
                .map_err(|e| ApiError::Decode(format!("{path} returned unexpected value: {e}"))),
            FunctionResponse::Error { error_message } => {
                tracing::debug!("{path} failed: {error_message}");
                Err(ApiError::Function(error_message))
            }
        }
    }
}

async fn check_for_response_success(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let value = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or_default();
        let message = ["errorMessage", "message", "Message", "detail"]
            .iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_str()))
            .unwrap_or("unknown error");
        return Err(ApiError::Http {
            context: context.to_string(),
            status: status.as_u16(),
            message: message.to_string(),
        });
    }
    Ok(response)
}
