use serde::Serialize;

/// Longest description the status API accepts.
pub const MAX_DESCRIPTION_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        })
    }
}

/// Body of a commit status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusPayload {
    pub state: StatusState,
    pub target_url: String,
    pub description: String,
    pub context: String,
}

impl StatusPayload {
    pub fn new(
        state: StatusState,
        target_url: impl Into<String>,
        description: &str,
        context: impl Into<String>,
    ) -> Self {
        Self {
            state,
            target_url: target_url.into(),
            description: description.chars().take(MAX_DESCRIPTION_CHARS).collect(),
            context: context.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("status request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("status API answered HTTP {0}, expected 201")]
    UnexpectedStatus(u16),
}

/// Posts commit statuses to the URL a pull request advertises.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    client: reqwest::Client,
    token: String,
}

impl StatusReporter {
    pub fn new(client: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }

    /// Create one status. Anything but `201 Created` counts as a failure.
    #[tracing::instrument(skip(self, payload), fields(state = %payload.state, context = %payload.context), err)]
    pub async fn post(&self, status_url: &str, payload: &StatusPayload) -> Result<(), StatusError> {
        let mut request = self
            .client
            .post(status_url)
            .header("User-Agent", crate::USER_AGENT)
            .json(payload);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let resp = request.send().await?;
        let status = resp.status().as_u16();
        if status != 201 {
            return Err(StatusError::UnexpectedStatus(status));
        }

        tracing::info!(url = status_url, status, "commit status posted");
        Ok(())
    }
}
