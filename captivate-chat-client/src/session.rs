//! Session: one connection, many conversations

use captivate_chat_core::config::{endpoint_url, ClientConfig, EndpointMode, EndpointsConfig};
use captivate_chat_core::protocol::{tags, OutboundEnvelope};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ReplyMatcher};
use crate::conversation::{Conversation, ConversationTable, StartMode};
use crate::dispatch;
use crate::error::{ClientError, Result};
use crate::transport::{Connector, WebSocketConnector};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the connection to the chat service and the conversations
/// multiplexed over it
pub struct Session {
    credential: String,
    mode: EndpointMode,
    endpoints: EndpointsConfig,
    connect_timeout: Duration,
    request_timeout: Duration,
    connector: Arc<dyn Connector>,
    channel: RwLock<Option<Arc<Channel>>>,
    conversations: Arc<ConversationTable>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    connect_in_flight: AtomicBool,
    start_in_flight: AtomicBool,
}

impl Session {
    /// Create a session for `credential` using WebSocket transport
    pub fn new(credential: impl Into<String>, mode: EndpointMode) -> Self {
        Self {
            credential: credential.into(),
            mode,
            endpoints: EndpointsConfig::default(),
            connect_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            connector: Arc::new(WebSocketConnector::new()),
            channel: RwLock::new(None),
            conversations: Arc::new(ConversationTable::default()),
            dispatcher: Mutex::new(None),
            connect_in_flight: AtomicBool::new(false),
            start_in_flight: AtomicBool::new(false),
        }
    }

    /// Create a session from loaded configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.api_key.clone(), config.mode)
            .with_endpoints(config.endpoints.clone())
            .with_connect_timeout(config.connect_timeout())
            .with_request_timeout(config.request_timeout())
    }

    /// Use another transport implementation
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Override the endpoint base URLs
    pub fn with_endpoints(mut self, endpoints: EndpointsConfig) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Window for request/reply exchanges (conversation start, transcript)
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn mode(&self) -> EndpointMode {
        self.mode
    }

    /// Connection URL with the credential embedded
    pub fn url(&self) -> String {
        endpoint_url(self.mode.base_url(&self.endpoints), &self.credential)
    }

    /// Whether the handshake completed and the channel is still open
    pub fn is_connected(&self) -> bool {
        self.channel
            .read()
            .as_ref()
            .is_some_and(|channel| channel.is_open())
    }

    /// Open the connection and wait for the service's `socket_connected`
    /// confirmation.
    ///
    /// A second call while one is still connecting is rejected with a state
    /// error rather than opening another socket.
    pub async fn connect(&self) -> Result<()> {
        if let Some(channel) = self.current_channel() {
            if channel.is_open() {
                debug!("Session already connected");
                return Ok(());
            }
            return Err(ClientError::State(
                "connection lost; create a new session to reconnect".to_string(),
            ));
        }
        let _in_flight = InFlight::acquire(&self.connect_in_flight, "connect")?;

        let transport = self.connector.open(&self.url()).await.map_err(|e| {
            error!("Failed to open connection: {}", e);
            e
        })?;
        let channel = Arc::new(Channel::new(transport.sink));

        // Registered before the dispatcher starts so the handshake cannot be missed.
        let handshake = channel.register_reply(ReplyMatcher::event(tags::SOCKET_CONNECTED));
        let dispatcher = tokio::spawn(dispatch::run(
            transport.events,
            Arc::clone(&channel),
            Arc::clone(&self.conversations),
        ));

        match handshake.wait("connect", self.connect_timeout).await {
            Ok(_) => {
                info!("API Successfully Connected");
                *self.channel.write() = Some(channel);
                if let Some(previous) = self.dispatcher.lock().replace(dispatcher) {
                    previous.abort();
                }
                Ok(())
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                dispatcher.abort();
                channel.shutdown("connection attempt failed").await;
                Err(e)
            }
        }
    }

    /// Ask the service for a new conversation and wait for its id.
    ///
    /// Only one call may be in flight per session: replies carry no request
    /// id, so a second concurrent call is rejected with a state error.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        user_basic_info: Value,
        user_data: Value,
        start_mode: StartMode,
    ) -> Result<Conversation> {
        let channel = self.require_channel()?;
        let _in_flight = InFlight::acquire(&self.start_in_flight, "createConversation")?;

        let reply = channel.register_reply(ReplyMatcher::event(tags::CONVERSATION_START_SUCCESS));
        let request = OutboundEnvelope::conversation_start(user_id, user_basic_info, user_data);
        if !channel.send(&request).await.is_sent() {
            return Err(ClientError::State(
                "conversation start not sent: channel is not open".to_string(),
            ));
        }

        let event = reply
            .wait("createConversation", self.request_timeout)
            .await?;
        let conversation_id = event
            .payload()
            .get("conversation_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ClientError::Protocol(
                    "conversation_start_success without conversation_id".to_string(),
                )
            })?
            .to_string();

        let conversation = self.register(&conversation_id, &channel);
        info!(conversation_id = %conversation_id, %start_mode, "Conversation started");

        if start_mode == StartMode::BotFirst {
            let delivery = conversation.send_message("").await;
            debug!(?delivery, "Sent bot-first opener");
        }
        Ok(conversation)
    }

    /// Return the conversation for a known id, creating a local handle
    /// without a round-trip when it is not cached yet.
    pub fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        if let Some(existing) = self.conversations.get(conversation_id) {
            return Ok(existing);
        }
        let channel = self.require_channel()?;
        Ok(self.register(conversation_id, &channel))
    }

    /// Ids of every conversation known to this session
    pub fn conversation_ids(&self) -> Vec<String> {
        self.conversations.ids()
    }

    /// Replies currently awaited on the channel
    pub fn pending_replies(&self) -> usize {
        self.current_channel()
            .map_or(0, |channel| channel.pending_replies())
    }

    /// Tear the session down: close the channel, fail pending replies, stop
    /// dispatch and drop every conversation with its listeners.
    pub async fn close(&self) {
        let channel = self.channel.write().take();
        if let Some(channel) = channel {
            channel.shutdown("session closed").await;
        }
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        for conversation in self.conversations.drain() {
            conversation.clear_listeners();
        }
        info!("Session closed");
    }

    fn current_channel(&self) -> Option<Arc<Channel>> {
        self.channel.read().clone()
    }

    fn require_channel(&self) -> Result<Arc<Channel>> {
        self.current_channel().ok_or_else(|| {
            error!("Socket is not initialized");
            ClientError::State("connection not established".to_string())
        })
    }

    fn register(&self, conversation_id: &str, channel: &Arc<Channel>) -> Conversation {
        self.conversations.get_or_insert_with(conversation_id, || {
            Conversation::new(conversation_id, Arc::clone(channel), self.request_timeout)
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
    }
}

/// Marks an operation as in flight until dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, operation: &str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| InFlight(flag))
            .map_err(|_| ClientError::State(format!("another {} call is in flight", operation)))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
