use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use shared::{
    domain::{ConversationId, Participant},
    error::{ApiError, ApiException},
    protocol::{
        ConversationSummary, CreateConversationRequest, MarkReadRequest, MessagePayload,
        SendMessageRequest,
    },
};

/// Request/response path for conversations and messages, fully decoupled from
/// the push channel. Authorization happens server-side; nothing here checks
/// permissions.
pub struct ChatApi {
    http: Client,
    server_url: String,
}

impl ChatApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
        }
    }

    pub async fn list_conversations(
        &self,
        participant: &Participant,
    ) -> Result<Vec<ConversationSummary>> {
        let response = self
            .http
            .get(format!(
                "{}/api/chat/conversations/{}/{}",
                self.server_url,
                participant.kind.as_str(),
                participant.user_id
            ))
            .send()
            .await?;
        let conversations = expect_success(response).await?.json().await?;
        Ok(conversations)
    }

    pub async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessagePayload>> {
        let response = self
            .http
            .get(format!(
                "{}/api/chat/conversations/{}/messages",
                self.server_url, conversation_id
            ))
            .send()
            .await?;
        let messages = expect_success(response).await?.json().await?;
        Ok(messages)
    }

    /// Creates a conversation unconditionally. There is deliberately no
    /// lookup for an existing conversation with the same participants;
    /// repeated calls create distinct conversations.
    pub async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationSummary> {
        let response = self
            .http
            .post(format!("{}/api/chat/conversations", self.server_url))
            .json(request)
            .send()
            .await?;
        let conversation = expect_success(response).await?.json().await?;
        Ok(conversation)
    }

    pub async fn send_message(&self, request: &SendMessageRequest) -> Result<MessagePayload> {
        let response = self
            .http
            .post(format!("{}/api/chat/messages", self.server_url))
            .json(request)
            .send()
            .await?;
        let message = expect_success(response).await?.json().await?;
        Ok(message)
    }

    pub async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        participant: &Participant,
    ) -> Result<()> {
        let response = self
            .http
            .put(format!(
                "{}/api/chat/conversations/{}/read",
                self.server_url, conversation_id
            ))
            .json(&MarkReadRequest {
                user_id: participant.user_id.clone(),
                user_type: participant.kind,
            })
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }
}

/// Turns a non-2xx response into the server's structured error when the body
/// carries one, else into a status-code error.
async fn expect_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ApiError>().await {
        Ok(body) => Err(ApiException::from(body).into()),
        Err(_) => Err(anyhow!("chat api request failed with status {status}")),
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
