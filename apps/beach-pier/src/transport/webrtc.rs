use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{
    CandidateHandler, ChannelEvent, ChannelEvents, ChannelHandler, DataChannel,
    IncomingChannelHandler, TransportError, TransportFactory, TransportSession,
};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

/// Builds webrtc-rs peer connections against a fixed ICE server list.
pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, TransportError> {
        Ok(Self {
            api: build_api()?,
            ice_servers,
        })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create_session(&self) -> Result<Arc<dyn TransportSession>, TransportError> {
        let pc = self
            .api
            .new_peer_connection(self.configuration())
            .await
            .map_err(to_setup_error)?;
        let pc = Arc::new(pc);
        pc.on_peer_connection_state_change(Box::new(|state| {
            Box::pin(async move {
                tracing::debug!(target: "pier::webrtc", ?state, "peer connection state changed");
            })
        }));
        Ok(Arc::new(WebRtcSession { pc }))
    }
}

fn build_api() -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl TransportSession for WebRtcSession {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(to_negotiation_error)?;
        description_from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(to_negotiation_error)?;
        description_from_rtc(&answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let description = description_to_rtc(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(to_negotiation_error)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.pc.local_description().await?;
        description_from_rtc(&description).ok()
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let description = description_to_rtc(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(to_negotiation_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(to_negotiation_error)
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(to_setup_error)?;
        Ok(WebRtcDataChannel::wrap(dc))
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        self.pc.on_ice_candidate(Box::new(move |candidate| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    tracing::trace!(target: "pier::webrtc", "ice gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => handler(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(err) => {
                        tracing::warn!(
                            target: "pier::webrtc",
                            error = %err,
                            "failed to serialize local ice candidate"
                        );
                    }
                }
            })
        }));
    }

    fn on_data_channel(&self, handler: IncomingChannelHandler) {
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                tracing::debug!(
                    target: "pier::webrtc",
                    label = dc.label(),
                    "remote data channel announced"
                );
                handler(WebRtcDataChannel::wrap(dc));
            })
        }));
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(target: "pier::webrtc", error = %err, "peer connection close failed");
        }
    }
}

pub struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
    events: Arc<ChannelEvents>,
    outbound: mpsc::UnboundedSender<String>,
}

impl WebRtcDataChannel {
    fn wrap(dc: Arc<RTCDataChannel>) -> Arc<dyn DataChannel> {
        let events = Arc::new(ChannelEvents::default());

        let open_events = Arc::clone(&events);
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                tracing::debug!(target: "pier::webrtc", "data channel opened");
                open_events.emit(ChannelEvent::Open);
            })
        }));
        let close_events = Arc::clone(&events);
        dc.on_close(Box::new(move || {
            let events = Arc::clone(&close_events);
            Box::pin(async move {
                tracing::debug!(target: "pier::webrtc", "data channel closed");
                events.emit(ChannelEvent::Closed);
            })
        }));
        let error_events = Arc::clone(&events);
        dc.on_error(Box::new(move |err| {
            let events = Arc::clone(&error_events);
            Box::pin(async move {
                tracing::warn!(target: "pier::webrtc", error = %err, "data channel error");
                events.emit(ChannelEvent::Error(err.to_string()));
            })
        }));
        let message_events = Arc::clone(&events);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = Arc::clone(&message_events);
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => events.emit(ChannelEvent::Message(text)),
                    Err(err) => {
                        tracing::warn!(
                            target: "pier::webrtc",
                            error = %err,
                            "dropping non-utf8 data channel frame"
                        );
                    }
                }
            })
        }));

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let sender = Arc::clone(&dc);
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = sender.send_text(text).await {
                    tracing::warn!(target: "pier::webrtc", error = %err, "data channel send failed");
                    break;
                }
            }
        });

        Arc::new(Self {
            dc,
            events,
            outbound,
        })
    }
}

impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if matches!(
            self.dc.ready_state(),
            RTCDataChannelState::Closing | RTCDataChannelState::Closed
        ) {
            return Err(TransportError::ChannelClosed);
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn set_handler(&self, handler: ChannelHandler) {
        self.events.set_handler(handler);
    }
}

fn description_from_rtc(
    description: &RTCSessionDescription,
) -> Result<SessionDescription, TransportError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        other => {
            return Err(TransportError::Negotiation(format!(
                "unsupported sdp type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp.clone(),
    })
}

fn description_to_rtc(
    description: SessionDescription,
) -> Result<RTCSessionDescription, TransportError> {
    let converted = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
    };
    converted.map_err(to_negotiation_error)
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Setup(err.to_string())
}

fn to_negotiation_error<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Negotiation(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test]
    async fn offer_becomes_local_description() {
        let factory = WebRtcTransportFactory::new(Vec::new()).expect("api");
        let session = factory.create_session().await.expect("session");
        let channel = session.create_data_channel("messenger").await.expect("channel");
        assert_eq!(channel.label(), "messenger");
        assert!(!channel.is_open());

        let offer = session.create_offer().await.expect("offer");
        assert_eq!(offer.kind, SdpKind::Offer);
        session
            .set_local_description(offer.clone())
            .await
            .expect("set local");

        let local = session.local_description().await.expect("local description");
        assert_eq!(local.kind, SdpKind::Offer);
        assert!(local.sdp.contains("webrtc-datachannel"));
        session.close().await;
    }

    #[test]
    fn rejects_garbage_sdp() {
        let result = description_to_rtc(SessionDescription::answer("not sdp"));
        assert!(matches!(result, Err(TransportError::Negotiation(_))));
    }
}
