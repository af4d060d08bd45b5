use std::sync::{Arc, Mutex, PoisonError};

use pipelink_frame::{Deadline, Timeout};
use pipelink_transport::{PipeEndpoint, PipeNamespace};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::error::{PeerError, Result};
use crate::events::{EventBus, PeerEvent};
use crate::handler::RequestHandler;
use crate::identity::ProcessIdentity;
use crate::inbound::{InboundShared, InboundTimeouts};
use crate::listener::{spawn_listener, ListenerHandle, ListenerSettings, ListenerState};
use crate::manager::ChannelManager;
use crate::outbound::ConnectSettings;
use crate::registry::{Client, ClientRegistry};

/// A process's presence on the pipe network.
///
/// Owns the inbound side (listener, client registry) and the outbound side
/// (channel manager). Outbound calls work without [`PipeService::start`];
/// only a started service accepts requests.
pub struct PipeService {
    config: ServiceConfig,
    identity: ProcessIdentity,
    settings: Arc<ConnectSettings>,
    registry: Arc<ClientRegistry>,
    manager: Arc<ChannelManager>,
    listener: Mutex<Option<ListenerHandle>>,
    shutdown: CancellationToken,
}

impl PipeService {
    pub fn new(config: ServiceConfig, identity: ProcessIdentity) -> Result<Self> {
        config.validate()?;
        identity.validate()?;

        let namespace =
            PipeNamespace::with_local_host(config.resolved_socket_dir(), &identity.host_name);
        let settings = Arc::new(ConnectSettings {
            namespace,
            identity: identity.clone(),
            local_pipe: config.pipe_name.clone(),
            connect_timeout: config.connect_timeout,
            max_payload_size: config.max_payload_size,
            max_handshake_payload: config.max_handshake_payload,
        });
        let manager = Arc::new(ChannelManager::new(
            Arc::clone(&settings),
            config.max_outbound_per_endpoint,
        ));

        Ok(Self {
            config,
            identity,
            settings,
            registry: Arc::new(ClientRegistry::new(EventBus::default())),
            manager,
            listener: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind the local pipe and start accepting requests for `handler`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<H: RequestHandler>(&self, handler: H) -> Result<()> {
        self.ensure_running()?;
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(PeerError::InvalidConfig(format!(
                "pipe '{}' is already being served",
                self.config.pipe_name
            )));
        }

        let listener = self.settings.namespace.bind(&self.config.pipe_name)?;
        let shared = Arc::new(InboundShared {
            registry: Arc::clone(&self.registry),
            manager: Arc::clone(&self.manager),
            handler: Arc::new(handler),
        });
        let settings = ListenerSettings {
            pipe_name: self.config.pipe_name.clone(),
            connect_timeout: self.config.connect_timeout,
            max_payload_size: self.config.max_payload_size,
            max_handshake_payload: self.config.max_handshake_payload,
            timeouts: InboundTimeouts {
                receive: self.config.receive_timeout,
                send: self.config.send_timeout,
            },
        };

        *slot = Some(spawn_listener(
            listener,
            settings,
            shared,
            self.config.max_inbound_connections,
            self.config.listener_scheduling,
            self.shutdown.child_token(),
        )?);
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        matches!(
            self.listener_state(),
            Some(state) if state != ListenerState::Stopped
        )
    }

    pub fn listener_state(&self) -> Option<ListenerState> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ListenerHandle::state)
    }

    /// Call `name` on `host` and return the reply value, bounded by the
    /// configured send timeout.
    pub async fn request<T>(&self, host: &str, name: &str, payload: &T) -> Result<Option<Value>>
    where
        T: Serialize + ?Sized,
    {
        self.request_with_timeout(host, name, payload, self.config.send_timeout)
            .await
    }

    pub async fn request_with_timeout<T>(
        &self,
        host: &str,
        name: &str,
        payload: &T,
        timeout: Timeout,
    ) -> Result<Option<Value>>
    where
        T: Serialize + ?Sized,
    {
        let deadline = Deadline::new(timeout);
        let endpoint = self.outbound_endpoint(host, name)?;
        let bytes = serde_json::to_vec(payload)?;
        self.manager.request(&endpoint, &bytes, deadline).await
    }

    /// Typed request; an empty reply decodes from `null`.
    pub async fn request_json<Req, Resp>(&self, host: &str, name: &str, payload: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let value = self.request(host, name, payload).await?;
        Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
    }

    /// Deliver `payload` and wait for the acknowledgement; the reply value
    /// is discarded.
    pub async fn send<T>(&self, host: &str, name: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let deadline = Deadline::new(self.config.send_timeout);
        let endpoint = self.outbound_endpoint(host, name)?;
        let bytes = serde_json::to_vec(payload)?;
        self.manager.send(&endpoint, &bytes, deadline).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.registry.subscribe()
    }

    /// Snapshot of connected peers.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.registry.clients()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn namespace(&self) -> &PipeNamespace {
        &self.settings.namespace
    }

    /// The endpoint other processes use to reach this service.
    pub fn local_endpoint(&self) -> Result<PipeEndpoint> {
        Ok(PipeEndpoint::new(
            self.identity.host_name.clone(),
            self.config.pipe_name.clone(),
        )?)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop listening, close every inbound channel and every pool.
    /// Later calls fail with [`PeerError::Shutdown`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.join().await;
        }
        self.registry.close_all();
        self.manager.close_all().await;
        tracing::info!(pipe = %self.config.pipe_name, "service shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PeerError::Shutdown);
        }
        Ok(())
    }

    fn outbound_endpoint(&self, host: &str, name: &str) -> Result<PipeEndpoint> {
        self.ensure_running()?;
        Ok(PipeEndpoint::new(host, name)?)
    }
}

impl Drop for PipeService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for PipeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeService")
            .field("pipe", &self.config.pipe_name)
            .field("identity", &self.identity)
            .field("listener", &self.listener_state())
            .field("clients", &self.registry.len())
            .field("pools", &self.manager.pool_count())
            .finish()
    }
}
