use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::protocol::ServerMessage;
use crate::relay::RelayClient;
use crate::session::{SessionError, SessionEvent, SessionEvents, SessionHandle, SessionManager};
use crate::transport::webrtc::WebRtcTransportFactory;

/// A running client: relay connection, webrtc transport and the session manager task.
pub struct PierClient {
    relay: Arc<RelayClient>,
    session: SessionHandle,
    task: JoinHandle<()>,
}

/// Connects to the configured relay and starts the session manager.
pub async fn connect(config: &Config) -> Result<PierClient, SessionError> {
    let events = SessionEvents::new();
    let relay_events = events.sender();
    let relay = RelayClient::connect(
        &config.relay_url,
        move |event| {
            let _ = relay_events.send(SessionEvent::Relay(event));
        },
        config.relay_retention,
    )
    .await?;
    let relay = Arc::new(relay);
    tracing::info!(target: "pier::relay", url = %relay.url(), "connected to relay");

    let factory = Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone())?);
    let manager = SessionManager::new(
        relay.clone(),
        factory,
        config.channel_label.clone(),
        events,
    );
    let (session, task) = manager.spawn();
    Ok(PierClient {
        relay,
        session,
        task,
    })
}

impl PierClient {
    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Relay messages retained for diagnostics, oldest first.
    pub fn relay_log(&self) -> Vec<ServerMessage> {
        self.relay.received()
    }

    pub async fn shutdown(self) {
        if let Err(err) = self.session.shutdown().await {
            tracing::debug!(target: "pier::session", error = %err, "session already stopped");
        }
        self.relay.close();
        if let Err(err) = self.task.await {
            tracing::warn!(target: "pier::session", error = %err, "session task failed");
        }
    }
}
