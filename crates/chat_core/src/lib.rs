use std::{sync::Arc, time::Duration};

use anyhow::Result;
use shared::{
    domain::{ConversationId, Participant},
    protocol::{
        AttachmentInfo, ConversationSummary, CreateConversationRequest, MessagePayload,
        SendMessageRequest, ServerFrame,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

pub mod gateway;
pub mod store;
pub mod transport;

pub use gateway::ChatApi;
pub use shared::domain::MessageKind;
pub use store::ConversationStore;
pub use transport::{ChannelPhase, PushChannel, PushChannelError};

/// Staleness bound while a conversation is open: its messages are refetched
/// on this interval no matter what the push channel is doing.
pub const MESSAGE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub enum ChatEvent {
    ConversationsUpdated(Vec<ConversationSummary>),
    MessagesUpdated {
        conversation_id: ConversationId,
        messages: Vec<MessagePayload>,
    },
}

/// A message as drafted by the user, before the sender identity is stamped on.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<AttachmentInfo>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            attachment: None,
        }
    }

    pub fn attachment(content: impl Into<String>, attachment: AttachmentInfo) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Attachment,
            attachment: Some(attachment),
        }
    }
}

/// Synchronization coordinator for one logged-in participant. Owns the push
/// channel, the REST gateway, and the cache; every refresh trigger funnels
/// into the same refetch-and-replace path, so concurrent triggers cost at
/// most a redundant fetch. Construct one per identity and dispose it with
/// [`ChatClient::shutdown`] on logout; an identity change means a new client.
pub struct ChatClient {
    api: ChatApi,
    push: Arc<PushChannel>,
    participant: Participant,
    poll_interval: Duration,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ChatEvent>,
}

struct ClientState {
    store: ConversationStore,
    selected: Option<ConversationId>,
    poll_task: Option<JoinHandle<()>>,
    push_task: Option<JoinHandle<()>>,
}

impl ChatClient {
    pub fn new(server_url: &str, participant: Participant) -> Result<Arc<Self>> {
        Self::new_with_intervals(
            server_url,
            participant,
            MESSAGE_POLL_INTERVAL,
            transport::RECONNECT_DELAY,
        )
    }

    pub fn new_with_intervals(
        server_url: &str,
        participant: Participant,
        poll_interval: Duration,
        reconnect_delay: Duration,
    ) -> Result<Arc<Self>> {
        let push = PushChannel::new_with_reconnect_delay(
            server_url,
            participant.clone(),
            reconnect_delay,
        )?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Arc::new(Self {
            api: ChatApi::new(server_url),
            push,
            participant,
            poll_interval,
            inner: Mutex::new(ClientState {
                store: ConversationStore::default(),
                selected: None,
                poll_task: None,
                push_task: None,
            }),
            events,
        }))
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub async fn channel_phase(&self) -> ChannelPhase {
        self.push.phase().await
    }

    /// Spawns the push-frame consumer, connects the channel, and performs the
    /// initial conversation-list fetch. Transport failures stay internal (the
    /// reconnect cycle handles them); a failed initial fetch is returned.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.inner.lock().await;
            if state.push_task.is_none() {
                state.push_task = Some(self.spawn_push_consumer());
            }
        }
        self.push.connect().await;
        self.refresh_conversations().await
    }

    /// Opens a conversation: re-arms the pull timer for it, loads its
    /// messages, and issues a best-effort read receipt. The previously open
    /// conversation's cache is retained, so returning to it renders instantly
    /// pending the next refresh trigger.
    pub async fn select_conversation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<()> {
        {
            let mut state = self.inner.lock().await;
            if let Some(task) = state.poll_task.take() {
                task.abort();
            }
            state.selected = Some(conversation_id.clone());
            state.poll_task = Some(self.spawn_message_poll(conversation_id.clone()));
        }

        self.refresh_messages(&conversation_id).await?;
        self.mark_conversation_read(&conversation_id).await;
        Ok(())
    }

    /// Deselects the open conversation and disarms its pull timer.
    pub async fn close_conversation(&self) {
        let mut state = self.inner.lock().await;
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        state.selected = None;
    }

    pub async fn selected_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().await.selected.clone()
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.lock().await.store.conversations().to_vec()
    }

    pub async fn messages(&self, conversation_id: &ConversationId) -> Vec<MessagePayload> {
        self.inner.lock().await.store.messages(conversation_id).to_vec()
    }

    /// Creates a conversation through the gateway, then refreshes the list.
    /// No existing-conversation lookup happens anywhere on this path;
    /// repeated calls with the same participants create distinct threads.
    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ConversationSummary> {
        let conversation = self.api.create_conversation(&request).await?;
        if let Err(err) = self.refresh_conversations().await {
            warn!("conversation refresh after create failed: {err}");
        }
        Ok(conversation)
    }

    /// Sends a message with this client's identity and display name stamped
    /// on at send time. A gateway failure propagates to the caller and leaves
    /// the cache untouched; there is no automatic retry.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        draft: OutgoingMessage,
    ) -> Result<MessagePayload> {
        let request = SendMessageRequest {
            conversation_id: conversation_id.clone(),
            sender_id: self.participant.user_id.clone(),
            sender_type: self.participant.kind,
            sender_name: self.participant.display_name.clone(),
            content: draft.content,
            message_type: draft.kind,
            attachment: draft.attachment,
        };
        let message = self.api.send_message(&request).await?;

        // Server confirmed the write; one immediate refresh beats waiting for
        // the timer or a push round trip.
        if let Err(err) = self.refresh_messages(&conversation_id).await {
            warn!(conversation_id = %conversation_id, "message refresh after send failed: {err}");
        }
        Ok(message)
    }

    /// First-message path when no conversation exists yet: create, then send,
    /// as two independent round trips. A failure between the two leaves an
    /// empty conversation behind; resending recovers.
    pub async fn send_first_message(
        &self,
        request: CreateConversationRequest,
        draft: OutgoingMessage,
    ) -> Result<(ConversationSummary, MessagePayload)> {
        let conversation = self.create_conversation(request).await?;
        let message = self
            .send_message(conversation.conversation_id.clone(), draft)
            .await?;
        Ok((conversation, message))
    }

    /// Best-effort read receipt. Read state is not safety-critical, so
    /// failures are logged and swallowed.
    pub async fn mark_conversation_read(&self, conversation_id: &ConversationId) {
        if let Err(err) = self
            .api
            .mark_conversation_read(conversation_id, &self.participant)
            .await
        {
            warn!(conversation_id = %conversation_id, "mark-read failed: {err}");
        }
    }

    /// Disposes the client: tears down the push channel and aborts the poll
    /// and consumer tasks so nothing fires after logout.
    pub async fn shutdown(&self) {
        self.push.disconnect().await;
        let mut state = self.inner.lock().await;
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        if let Some(task) = state.push_task.take() {
            task.abort();
        }
        state.selected = None;
    }

    fn spawn_push_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let mut frames = self.push.subscribe_frames();
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(ServerFrame::ChatMessage { .. }) => {
                        client.handle_chat_notification().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "push consumer lagged; refreshing anyway");
                        client.handle_chat_notification().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_message_poll(self: &Arc<Self>, conversation_id: ConversationId) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.poll_interval);
            // Selection already fetched once; the timer covers staleness from
            // here on, push channel or no push channel.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = client.refresh_messages(&conversation_id).await {
                    debug!(conversation_id = %conversation_id, "poll refresh failed: {err}");
                }
            }
        })
    }

    /// A pushed `chat_message` invalidates both the open conversation's
    /// messages and the list (ordering and previews move). Refresh failures
    /// here stay internal: the pull timer bounds any resulting staleness.
    async fn handle_chat_notification(&self) {
        let selected = { self.inner.lock().await.selected.clone() };
        if let Some(conversation_id) = selected {
            if let Err(err) = self.refresh_messages(&conversation_id).await {
                debug!(conversation_id = %conversation_id, "push-triggered message refresh failed: {err}");
            }
        }
        if let Err(err) = self.refresh_conversations().await {
            debug!("push-triggered conversation refresh failed: {err}");
        }
    }

    async fn refresh_conversations(&self) -> Result<()> {
        let conversations = self.api.list_conversations(&self.participant).await?;
        let snapshot = {
            let mut state = self.inner.lock().await;
            state.store.replace_conversations(conversations);
            state.store.conversations().to_vec()
        };
        let _ = self.events.send(ChatEvent::ConversationsUpdated(snapshot));
        Ok(())
    }

    async fn refresh_messages(&self, conversation_id: &ConversationId) -> Result<()> {
        let messages = self.api.list_messages(conversation_id).await?;
        let snapshot = {
            let mut state = self.inner.lock().await;
            state
                .store
                .replace_messages(conversation_id.clone(), messages);
            state.store.messages(conversation_id).to_vec()
        };
        let _ = self.events.send(ChatEvent::MessagesUpdated {
            conversation_id: conversation_id.clone(),
            messages: snapshot,
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
