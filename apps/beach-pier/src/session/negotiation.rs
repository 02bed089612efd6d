use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::SessionEvent;
use crate::protocol::{IceCandidate, SessionDescription};
use crate::transport::{
    ChannelEvent, DataChannel, TransportError, TransportFactory, TransportSession,
};

/// Work queued on a generation's negotiation worker. Steps run strictly one after another.
#[derive(Debug, Clone)]
pub(crate) enum NegotiationStep {
    Offer { peer: String },
    Answer { peer: String, offer: SessionDescription },
    ApplyAnswer { answer: SessionDescription },
    AddCandidate { candidate: IceCandidate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStage {
    Setup,
    DataChannel,
    Offer,
    Answer,
    LocalDescription,
    RemoteDescription,
    Candidate,
}

impl fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            NegotiationStage::Setup => "setup",
            NegotiationStage::DataChannel => "data channel",
            NegotiationStage::Offer => "offer",
            NegotiationStage::Answer => "answer",
            NegotiationStage::LocalDescription => "local description",
            NegotiationStage::RemoteDescription => "remote description",
            NegotiationStage::Candidate => "candidate",
        };
        f.write_str(stage)
    }
}

/// Results and callbacks reported by a worker, tagged with the generation that produced them.
pub enum NegotiationEvent {
    TransportReady {
        generation: u64,
    },
    LocalCandidate {
        generation: u64,
        candidate: IceCandidate,
    },
    LocalChannel {
        generation: u64,
        channel_id: u64,
        channel: Arc<dyn DataChannel>,
    },
    RemoteChannel {
        generation: u64,
        channel_id: u64,
        channel: Arc<dyn DataChannel>,
    },
    Channel {
        generation: u64,
        channel_id: u64,
        event: ChannelEvent,
    },
    OfferReady {
        generation: u64,
        peer: String,
        offer: SessionDescription,
    },
    AnswerReady {
        generation: u64,
        peer: String,
        answer: SessionDescription,
    },
    AnswerApplied {
        generation: u64,
    },
    Failed {
        generation: u64,
        stage: NegotiationStage,
        error: TransportError,
    },
}

impl NegotiationEvent {
    pub fn generation(&self) -> u64 {
        match self {
            NegotiationEvent::TransportReady { generation }
            | NegotiationEvent::LocalCandidate { generation, .. }
            | NegotiationEvent::LocalChannel { generation, .. }
            | NegotiationEvent::RemoteChannel { generation, .. }
            | NegotiationEvent::Channel { generation, .. }
            | NegotiationEvent::OfferReady { generation, .. }
            | NegotiationEvent::AnswerReady { generation, .. }
            | NegotiationEvent::AnswerApplied { generation }
            | NegotiationEvent::Failed { generation, .. } => *generation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationEvent::TransportReady { .. } => "transport_ready",
            NegotiationEvent::LocalCandidate { .. } => "local_candidate",
            NegotiationEvent::LocalChannel { .. } => "local_channel",
            NegotiationEvent::RemoteChannel { .. } => "remote_channel",
            NegotiationEvent::Channel { .. } => "channel",
            NegotiationEvent::OfferReady { .. } => "offer_ready",
            NegotiationEvent::AnswerReady { .. } => "answer_ready",
            NegotiationEvent::AnswerApplied { .. } => "answer_applied",
            NegotiationEvent::Failed { .. } => "failed",
        }
    }
}

/// Manager-side handle to one generation's worker. Dropping it closes the step queue; the
/// worker then finishes what is already queued and closes its transport session.
pub(crate) struct Negotiator {
    generation: u64,
    steps: mpsc::UnboundedSender<NegotiationStep>,
    pristine: bool,
}

impl Negotiator {
    pub(crate) fn spawn(
        generation: u64,
        factory: Arc<dyn TransportFactory>,
        channel_label: String,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (steps, steps_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            generation,
            channel_label,
            events,
            next_channel_id: Arc::new(AtomicU64::new(0)),
        };
        tokio::spawn(worker.run(factory, steps_rx));
        Self {
            generation,
            steps,
            pristine: true,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// True until a description has been queued on this session.
    pub(crate) fn is_pristine(&self) -> bool {
        self.pristine
    }

    pub(crate) fn submit(&mut self, step: NegotiationStep) {
        if !matches!(step, NegotiationStep::AddCandidate { .. }) {
            self.pristine = false;
        }
        if self.steps.send(step).is_err() {
            tracing::debug!(
                target: "pier::session",
                generation = self.generation,
                "negotiation worker already stopped"
            );
        }
    }
}

#[derive(Clone)]
struct Worker {
    generation: u64,
    channel_label: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_channel_id: Arc<AtomicU64>,
}

type StepResult = Result<(), (NegotiationStage, TransportError)>;

impl Worker {
    async fn run(
        self,
        factory: Arc<dyn TransportFactory>,
        mut steps: mpsc::UnboundedReceiver<NegotiationStep>,
    ) {
        let session = match factory.create_session().await {
            Ok(session) => session,
            Err(error) => {
                self.post(NegotiationEvent::Failed {
                    generation: self.generation,
                    stage: NegotiationStage::Setup,
                    error,
                });
                return;
            }
        };
        self.register_callbacks(session.as_ref());
        self.post(NegotiationEvent::TransportReady {
            generation: self.generation,
        });
        tracing::debug!(target: "pier::session", generation = self.generation, "transport session ready");

        while let Some(step) = steps.recv().await {
            if let Err((stage, error)) = self.execute(session.as_ref(), step).await {
                self.post(NegotiationEvent::Failed {
                    generation: self.generation,
                    stage,
                    error,
                });
            }
        }

        session.close().await;
        tracing::debug!(target: "pier::session", generation = self.generation, "transport session closed");
    }

    fn register_callbacks(&self, session: &dyn TransportSession) {
        let candidates = self.clone();
        session.on_ice_candidate(Arc::new(move |candidate: IceCandidate| {
            candidates.post(NegotiationEvent::LocalCandidate {
                generation: candidates.generation,
                candidate,
            });
        }));
        let channels = self.clone();
        session.on_data_channel(Arc::new(move |channel: Arc<dyn DataChannel>| {
            channels.wire_channel(channel, false);
        }));
    }

    async fn execute(&self, session: &dyn TransportSession, step: NegotiationStep) -> StepResult {
        match step {
            NegotiationStep::Offer { peer } => {
                let channel = session
                    .create_data_channel(&self.channel_label)
                    .await
                    .map_err(|err| (NegotiationStage::DataChannel, err))?;
                self.wire_channel(channel, true);
                let offer = session
                    .create_offer()
                    .await
                    .map_err(|err| (NegotiationStage::Offer, err))?;
                let offer = self.finalize_local(session, offer).await?;
                self.post(NegotiationEvent::OfferReady {
                    generation: self.generation,
                    peer,
                    offer,
                });
            }
            NegotiationStep::Answer { peer, offer } => {
                session
                    .set_remote_description(offer)
                    .await
                    .map_err(|err| (NegotiationStage::RemoteDescription, err))?;
                let answer = session
                    .create_answer()
                    .await
                    .map_err(|err| (NegotiationStage::Answer, err))?;
                let answer = self.finalize_local(session, answer).await?;
                self.post(NegotiationEvent::AnswerReady {
                    generation: self.generation,
                    peer,
                    answer,
                });
            }
            NegotiationStep::ApplyAnswer { answer } => {
                session
                    .set_remote_description(answer)
                    .await
                    .map_err(|err| (NegotiationStage::RemoteDescription, err))?;
                self.post(NegotiationEvent::AnswerApplied {
                    generation: self.generation,
                });
            }
            NegotiationStep::AddCandidate { candidate } => {
                session
                    .add_ice_candidate(candidate)
                    .await
                    .map_err(|err| (NegotiationStage::Candidate, err))?;
            }
        }
        Ok(())
    }

    /// Applies `description` locally and reads back what the transport settled on.
    async fn finalize_local(
        &self,
        session: &dyn TransportSession,
        description: SessionDescription,
    ) -> Result<SessionDescription, (NegotiationStage, TransportError)> {
        session
            .set_local_description(description)
            .await
            .map_err(|err| (NegotiationStage::LocalDescription, err))?;
        session.local_description().await.ok_or_else(|| {
            (
                NegotiationStage::LocalDescription,
                TransportError::Negotiation("local description missing after set".into()),
            )
        })
    }

    /// Announces the channel to the manager, then routes its events. The announcement is queued
    /// first so the manager knows the channel before any of its events.
    fn wire_channel(&self, channel: Arc<dyn DataChannel>, local: bool) {
        let channel_id = self.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1;
        let announcement = if local {
            NegotiationEvent::LocalChannel {
                generation: self.generation,
                channel_id,
                channel: Arc::clone(&channel),
            }
        } else {
            NegotiationEvent::RemoteChannel {
                generation: self.generation,
                channel_id,
                channel: Arc::clone(&channel),
            }
        };
        self.post(announcement);

        let worker = self.clone();
        channel.set_handler(Arc::new(move |event: ChannelEvent| {
            worker.post(NegotiationEvent::Channel {
                generation: worker.generation,
                channel_id,
                event,
            });
        }));
    }

    fn post(&self, event: NegotiationEvent) {
        if self.events.send(SessionEvent::Negotiation(event)).is_err() {
            tracing::trace!(target: "pier::session", generation = self.generation, "session manager gone");
        }
    }
}
