//! Command Agent Client
//!
//! The agent is an external service that executes free-text commands on
//! behalf of a web user and answers with an ordered list of reply strings.

use crate::error::AgentError;
use async_trait::async_trait;
use std::time::Duration;

const EXECUTE_COMMAND_PATH: &str = "/api/execute_command/";

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Run `message` as `user_id` and return the replies in order.
    ///
    /// A reachable agent that answers with an error status or an unexpected
    /// body yields an empty list; only transport failures are errors.
    async fn execute_command(&self, message: &str, user_id: &str)
    -> Result<Vec<String>, AgentError>;
}

/// reqwest-backed [`AgentClient`].
#[derive(Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn execute_command(
        &self,
        message: &str,
        user_id: &str,
    ) -> Result<Vec<String>, AgentError> {
        let url = format!("{}{}", self.base_url, EXECUTE_COMMAND_PATH);
        let response = self
            .http
            .get(&url)
            .query(&[("message", message), ("user_uuid", user_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(%status, user_id, "Agent returned an error status");
            return Ok(vec![]);
        }

        let body = response.text().await?;
        match serde_json::from_str::<Vec<String>>(&body) {
            Ok(replies) => {
                tracing::debug!(user_id, count = replies.len(), "Agent replied");
                Ok(replies)
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Invalid agent response format");
                Ok(vec![])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn client(server: &mockito::ServerGuard) -> HttpAgentClient {
        HttpAgentClient::new(server.url(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn test_replies_in_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/execute_command/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("message".into(), "list files".into()),
                Matcher::UrlEncoded("user_uuid".into(), "u-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"["a","b"]"#)
            .create_async()
            .await;

        let replies = client(&server)
            .await
            .execute_command("list files", "u-1")
            .await
            .expect("replies");
        assert_eq!(replies, vec!["a".to_string(), "b".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_degrades_to_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/execute_command/")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let replies = client(&server)
            .await
            .execute_command("x", "u-1")
            .await
            .expect("degrades");
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_non_array_degrades_to_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/execute_command/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"reply":"a"}"#)
            .create_async()
            .await;

        let replies = client(&server)
            .await
            .execute_command("x", "u-1")
            .await
            .expect("degrades");
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_error() {
        // Reserve a free port, then release it so the connect is refused.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .expect("free port");
        let client = HttpAgentClient::new(format!("http://{addr}"), Duration::from_secs(2))
            .expect("client");
        assert!(client.execute_command("x", "u-1").await.is_err());
    }
}
