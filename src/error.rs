use thiserror::Error;

/// Failure of one source fetcher. The pipeline treats every variant as
/// "this source contributed nothing" and carries on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("Missing credentials: {0}")]
    Credentials(String),

    #[error("Could not decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // The client-level timeout is not visible on the error, so no
        // duration is reported here.
        if err.is_timeout() {
            let what = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "request".to_string());
            FetchError::Network(format!("{} timed out", what))
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// A record that cannot continue through a stage.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record has no cid; discarded at stage '{stage}'")]
    MissingCid { stage: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    #[tokio::test]
    async fn client_timeout_is_a_network_error() {
        // Accepts connections into the backlog but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let err = client
            .get(format!("http://{}/slow", addr))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let msg = FetchError::from(err).to_string();
        assert!(msg.starts_with("Network error:"), "{}", msg);
        assert!(msg.contains("timed out"));
    }
}
