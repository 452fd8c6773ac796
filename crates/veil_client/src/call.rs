//! Call signaling: the state machine that drives a one-to-one audio call
//! over the relayed `webrtc_*` frames.
//!
//! The actual media stack sits behind [`MediaEngine`] / [`MediaSession`];
//! the coordinator never touches RTP or codecs, it only sequences SDP and
//! ICE exchange and owns the session lifecycle. The session is held in an
//! `Option` and taken exactly once on teardown, so dispose cannot double-
//! fire no matter how many paths converge on `end_call`.
//!
//! Phase transitions:
//!
//! ```text
//! Idle ── start_call ──▶ OutgoingOfferPending ── local offer SDP ──▶
//!     OutgoingAwaitingAnswer ── remote answer + connected ──▶ Connected
//! Idle ── remote offer ──▶ IncomingRinging ── accept_call ──▶ Connected
//! any  ── end_call / disconnect / failure ──▶ Idle
//! ```
//!
//! Remote ICE candidates that arrive while an incoming call is still
//! ringing are buffered and flushed into the session on accept.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use veil_proto::Frame;

use crate::channel::FrameSink;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("Already in a call")]
    AlreadyInCall,

    #[error("No incoming call to accept")]
    NotRinging,

    #[error("Media engine error: {0}")]
    Media(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    /// `start_call` ran; waiting for the local offer SDP from the media
    /// engine before anything goes on the wire.
    OutgoingOfferPending,
    /// Offer sent; waiting for the remote answer.
    OutgoingAwaitingAnswer,
    /// Remote offer received; waiting for the local user to accept.
    IncomingRinging,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: u32,
}

/// Transport-level states surfaced by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications out of the media engine, consumed by
/// [`CallCoordinator::handle_media_event`].
#[derive(Debug, Clone)]
pub enum MediaEvent {
    LocalSdp { kind: SdpKind, sdp: String },
    IceCandidate(IceCandidate),
    ConnectionState(ConnState),
}

/// One live audio session. `dispose` consumes the session; a disposed
/// session cannot be reused.
pub trait MediaSession {
    fn create_offer(&mut self) -> impl std::future::Future<Output = Result<(), CallError>> + Send;
    fn create_answer(
        &mut self,
        remote_offer: &str,
    ) -> impl std::future::Future<Output = Result<(), CallError>> + Send;
    fn set_remote_answer(
        &mut self,
        sdp: &str,
    ) -> impl std::future::Future<Output = Result<(), CallError>> + Send;
    fn add_ice_candidate(
        &mut self,
        candidate: &IceCandidate,
    ) -> impl std::future::Future<Output = Result<(), CallError>> + Send;
    fn set_muted(&mut self, muted: bool);
    fn dispose(self);
}

/// Factory for media sessions. SDP, ICE and connection-state changes come
/// back through the event sender handed to `open_session`.
pub trait MediaEngine {
    type Session: MediaSession + Send;

    fn open_session(
        &self,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Self::Session, CallError>;
}

pub struct CallCoordinator<E: MediaEngine, S: FrameSink> {
    engine: E,
    sink: S,
    local_peer_id: String,
    events_tx: mpsc::UnboundedSender<MediaEvent>,
    phase: CallPhase,
    peer: Option<String>,
    session: Option<E::Session>,
    pending_offer: Option<String>,
    pending_remote_ice: Vec<IceCandidate>,
}

impl<E: MediaEngine, S: FrameSink> CallCoordinator<E, S> {
    pub fn new(
        engine: E,
        sink: S,
        local_peer_id: String,
        events_tx: mpsc::UnboundedSender<MediaEvent>,
    ) -> Self {
        Self {
            engine,
            sink,
            local_peer_id,
            events_tx,
            phase: CallPhase::Idle,
            peer: None,
            session: None,
            pending_offer: None,
            pending_remote_ice: Vec::new(),
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    // ── Local operations ──

    /// Dial `peer`. The offer frame goes out once the media engine
    /// delivers the local SDP.
    pub async fn start_call(&mut self, peer: &str) -> Result<(), CallError> {
        if self.phase != CallPhase::Idle {
            return Err(CallError::AlreadyInCall);
        }
        let mut session = self.engine.open_session(self.events_tx.clone())?;
        if let Err(e) = session.create_offer().await {
            warn!(error = %e, "offer creation failed, call abandoned");
            session.dispose();
            return Err(e);
        }
        self.session = Some(session);
        self.peer = Some(peer.to_string());
        self.phase = CallPhase::OutgoingOfferPending;
        info!(peer, "outgoing call started");
        Ok(())
    }

    /// Answer the ringing call; buffered remote ICE is flushed into the
    /// fresh session before any new candidates can arrive.
    ///
    /// A media failure at any step tears the call down to Idle; the
    /// half-built session is disposed, never left dangling.
    pub async fn accept_call(&mut self) -> Result<(), CallError> {
        if self.phase != CallPhase::IncomingRinging {
            return Err(CallError::NotRinging);
        }
        let offer = self.pending_offer.take().ok_or(CallError::NotRinging)?;
        let mut session = match self.engine.open_session(self.events_tx.clone()) {
            Ok(session) => session,
            Err(e) => {
                self.end_call();
                return Err(e);
            }
        };
        let queued = std::mem::take(&mut self.pending_remote_ice);
        let setup = async {
            session.create_answer(&offer).await?;
            for candidate in &queued {
                session.add_ice_candidate(candidate).await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = setup {
            warn!(error = %e, "media setup failed, call abandoned");
            session.dispose();
            self.end_call();
            return Err(e);
        }
        self.session = Some(session);
        self.phase = CallPhase::Connected;
        info!(peer = self.peer.as_deref(), "incoming call accepted");
        Ok(())
    }

    /// Tear down from any phase. Idempotent: the session is disposed at
    /// most once and a second call is a no-op.
    pub fn end_call(&mut self) {
        if let Some(session) = self.session.take() {
            session.dispose();
            info!(peer = self.peer.as_deref(), "call ended");
        }
        self.phase = CallPhase::Idle;
        self.peer = None;
        self.pending_offer = None;
        self.pending_remote_ice.clear();
    }

    pub fn set_muted(&mut self, muted: bool) {
        if let Some(session) = self.session.as_mut() {
            session.set_muted(muted);
        }
    }

    // ── Inbound signaling frames ──

    pub fn handle_offer(&mut self, from: String, sdp: String) {
        if self.phase != CallPhase::Idle {
            warn!(%from, phase = ?self.phase, "busy, incoming offer ignored");
            return;
        }
        self.peer = Some(from);
        self.pending_offer = Some(sdp);
        self.phase = CallPhase::IncomingRinging;
        info!(peer = self.peer.as_deref(), "incoming call ringing");
    }

    pub async fn handle_answer(&mut self, from: &str, sdp: &str) -> Result<(), CallError> {
        if self.phase != CallPhase::OutgoingAwaitingAnswer || self.peer.as_deref() != Some(from) {
            warn!(%from, phase = ?self.phase, "unexpected answer ignored");
            return Ok(());
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.set_remote_answer(sdp).await {
                // A session that rejected the answer is unusable; tear
                // down rather than wait in OutgoingAwaitingAnswer forever.
                warn!(%from, error = %e, "remote answer rejected, ending call");
                self.end_call();
                return Err(e);
            }
            debug!(%from, "remote answer applied");
        }
        Ok(())
    }

    pub async fn handle_remote_ice(&mut self, from: &str, candidate: IceCandidate) -> Result<(), CallError> {
        if self.peer.as_deref() != Some(from) {
            debug!(%from, "ice candidate from a peer we are not calling, dropped");
            return Ok(());
        }
        match self.session.as_mut() {
            Some(session) => {
                if let Err(e) = session.add_ice_candidate(&candidate).await {
                    warn!(%from, error = %e, "candidate rejected, ending call");
                    self.end_call();
                    return Err(e);
                }
            }
            // Still ringing: no session yet, hold the candidate.
            None if self.phase == CallPhase::IncomingRinging => {
                self.pending_remote_ice.push(candidate);
            }
            None => debug!(%from, "ice candidate with no session, dropped"),
        }
        Ok(())
    }

    // ── Media engine events ──

    pub async fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LocalSdp { kind: SdpKind::Offer, sdp } => {
                if self.phase != CallPhase::OutgoingOfferPending {
                    warn!(phase = ?self.phase, "local offer in unexpected phase, dropped");
                    return;
                }
                if let Some(to) = self.peer.clone() {
                    let sent = self
                        .sink
                        .send(Frame::WebrtcOffer {
                            from: self.local_peer_id.clone(),
                            to,
                            sdp,
                        })
                        .await;
                    if sent {
                        self.phase = CallPhase::OutgoingAwaitingAnswer;
                    } else {
                        warn!("offer could not be sent, abandoning call");
                        self.end_call();
                    }
                }
            }
            MediaEvent::LocalSdp { kind: SdpKind::Answer, sdp } => {
                if let Some(to) = self.peer.clone() {
                    if !self
                        .sink
                        .send(Frame::WebrtcAnswer {
                            from: self.local_peer_id.clone(),
                            to,
                            sdp,
                        })
                        .await
                    {
                        warn!("answer could not be sent, abandoning call");
                        self.end_call();
                    }
                }
            }
            MediaEvent::IceCandidate(candidate) => {
                if self.phase == CallPhase::Idle {
                    return;
                }
                if let Some(to) = self.peer.clone() {
                    self.sink
                        .send(Frame::WebrtcIce {
                            from: self.local_peer_id.clone(),
                            to,
                            candidate: candidate.candidate,
                            sdp_mid: candidate.sdp_mid,
                            sdp_m_line_index: candidate.sdp_m_line_index,
                        })
                        .await;
                }
            }
            MediaEvent::ConnectionState(state) => match state {
                ConnState::Connected => {
                    if self.phase == CallPhase::OutgoingAwaitingAnswer {
                        self.phase = CallPhase::Connected;
                        info!(peer = self.peer.as_deref(), "call connected");
                    }
                }
                ConnState::Disconnected | ConnState::Failed | ConnState::Closed => {
                    debug!(?state, "media transport down, ending call");
                    self.end_call();
                }
                ConnState::New | ConnState::Connecting => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MediaLog {
        offers: u32,
        answers: Vec<String>,
        remote_answers: Vec<String>,
        ice: Vec<String>,
        disposed: u32,
        muted: Vec<bool>,
        fail_create_answer: bool,
        fail_remote_answer: bool,
        fail_add_ice: bool,
    }

    #[derive(Clone, Default)]
    struct MockEngine {
        log: Arc<Mutex<MediaLog>>,
    }

    struct MockSession {
        log: Arc<Mutex<MediaLog>>,
    }

    impl MediaSession for MockSession {
        async fn create_offer(&mut self) -> Result<(), CallError> {
            self.log.lock().unwrap().offers += 1;
            Ok(())
        }
        async fn create_answer(&mut self, remote_offer: &str) -> Result<(), CallError> {
            let mut log = self.log.lock().unwrap();
            if log.fail_create_answer {
                return Err(CallError::Media("sdp rejected".into()));
            }
            log.answers.push(remote_offer.into());
            Ok(())
        }
        async fn set_remote_answer(&mut self, sdp: &str) -> Result<(), CallError> {
            let mut log = self.log.lock().unwrap();
            if log.fail_remote_answer {
                return Err(CallError::Media("sdp rejected".into()));
            }
            log.remote_answers.push(sdp.into());
            Ok(())
        }
        async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), CallError> {
            let mut log = self.log.lock().unwrap();
            if log.fail_add_ice {
                return Err(CallError::Media("candidate rejected".into()));
            }
            log.ice.push(candidate.candidate.clone());
            Ok(())
        }
        fn set_muted(&mut self, muted: bool) {
            self.log.lock().unwrap().muted.push(muted);
        }
        fn dispose(self) {
            self.log.lock().unwrap().disposed += 1;
        }
    }

    impl MediaEngine for MockEngine {
        type Session = MockSession;
        fn open_session(
            &self,
            _events: mpsc::UnboundedSender<MediaEvent>,
        ) -> Result<MockSession, CallError> {
            Ok(MockSession { log: self.log.clone() })
        }
    }

    #[derive(Clone, Default)]
    struct CaptureSink {
        frames: Arc<Mutex<Vec<Frame>>>,
    }

    impl FrameSink for CaptureSink {
        async fn send(&self, frame: Frame) -> bool {
            self.frames.lock().unwrap().push(frame);
            true
        }
        async fn send_chunk(&self, frame: Frame) -> bool {
            self.send(frame).await
        }
    }

    fn coordinator() -> (
        CallCoordinator<MockEngine, CaptureSink>,
        Arc<Mutex<MediaLog>>,
        Arc<Mutex<Vec<Frame>>>,
    ) {
        let engine = MockEngine::default();
        let sink = CaptureSink::default();
        let log = engine.log.clone();
        let frames = sink.frames.clone();
        let (tx, _rx) = mpsc::unbounded_channel();
        (CallCoordinator::new(engine, sink, "alice".into(), tx), log, frames)
    }

    #[tokio::test]
    async fn outgoing_call_reaches_connected() {
        let (mut c, log, frames) = coordinator();

        c.start_call("bob").await.unwrap();
        assert_eq!(c.phase(), CallPhase::OutgoingOfferPending);
        assert_eq!(log.lock().unwrap().offers, 1);

        c.handle_media_event(MediaEvent::LocalSdp {
            kind: SdpKind::Offer,
            sdp: "offer-sdp".into(),
        })
        .await;
        assert_eq!(c.phase(), CallPhase::OutgoingAwaitingAnswer);
        assert!(matches!(
            frames.lock().unwrap().as_slice(),
            [Frame::WebrtcOffer { to, sdp, .. }] if to == "bob" && sdp == "offer-sdp"
        ));

        c.handle_answer("bob", "answer-sdp").await.unwrap();
        assert_eq!(log.lock().unwrap().remote_answers, ["answer-sdp"]);

        c.handle_media_event(MediaEvent::ConnectionState(ConnState::Connected))
            .await;
        assert_eq!(c.phase(), CallPhase::Connected);
    }

    #[tokio::test]
    async fn incoming_call_buffers_ice_until_accept() {
        let (mut c, log, frames) = coordinator();

        c.handle_offer("bob".into(), "their-offer".into());
        assert_eq!(c.phase(), CallPhase::IncomingRinging);

        // Candidates before accept must not be lost.
        for i in 0..2 {
            c.handle_remote_ice(
                "bob",
                IceCandidate {
                    candidate: format!("cand-{i}"),
                    sdp_mid: Some("0".into()),
                    sdp_m_line_index: 0,
                },
            )
            .await
            .unwrap();
        }
        assert!(log.lock().unwrap().ice.is_empty());

        c.accept_call().await.unwrap();
        assert_eq!(c.phase(), CallPhase::Connected);
        {
            let log = log.lock().unwrap();
            assert_eq!(log.answers, ["their-offer"]);
            assert_eq!(log.ice, ["cand-0", "cand-1"]);
        }

        // The local answer SDP goes back out as a frame.
        c.handle_media_event(MediaEvent::LocalSdp {
            kind: SdpKind::Answer,
            sdp: "my-answer".into(),
        })
        .await;
        assert!(matches!(
            frames.lock().unwrap().last(),
            Some(Frame::WebrtcAnswer { to, sdp, .. }) if to == "bob" && sdp == "my-answer"
        ));
    }

    #[tokio::test]
    async fn end_call_disposes_exactly_once() {
        let (mut c, log, _frames) = coordinator();

        c.start_call("bob").await.unwrap();
        c.end_call();
        c.end_call();
        assert_eq!(log.lock().unwrap().disposed, 1);
        assert_eq!(c.phase(), CallPhase::Idle);

        // Coordinator is reusable after teardown.
        c.start_call("carol").await.unwrap();
        assert_eq!(c.phase(), CallPhase::OutgoingOfferPending);
    }

    #[tokio::test]
    async fn busy_peer_rejects_second_call() {
        let (mut c, log, _frames) = coordinator();

        c.start_call("bob").await.unwrap();
        assert!(matches!(c.start_call("carol").await, Err(CallError::AlreadyInCall)));

        // A remote offer while busy is ignored, not answered.
        c.handle_offer("carol".into(), "sdp".into());
        assert_eq!(c.phase(), CallPhase::OutgoingOfferPending);
        assert_eq!(c.peer(), Some("bob"));
        assert!(log.lock().unwrap().answers.is_empty());
    }

    #[tokio::test]
    async fn accept_without_ring_is_an_error() {
        let (mut c, _log, _frames) = coordinator();
        assert!(matches!(c.accept_call().await, Err(CallError::NotRinging)));
    }

    #[tokio::test]
    async fn rejected_remote_answer_tears_down_to_idle() {
        let (mut c, log, _frames) = coordinator();

        c.start_call("bob").await.unwrap();
        c.handle_media_event(MediaEvent::LocalSdp {
            kind: SdpKind::Offer,
            sdp: "offer-sdp".into(),
        })
        .await;
        assert_eq!(c.phase(), CallPhase::OutgoingAwaitingAnswer);

        log.lock().unwrap().fail_remote_answer = true;
        let err = c.handle_answer("bob", "bad-answer").await.unwrap_err();
        assert!(matches!(err, CallError::Media(_)));

        // Never left waiting with a live session.
        assert_eq!(c.phase(), CallPhase::Idle);
        assert_eq!(log.lock().unwrap().disposed, 1);
    }

    #[tokio::test]
    async fn failed_accept_disposes_session_and_returns_to_idle() {
        let (mut c, log, _frames) = coordinator();

        c.handle_offer("bob".into(), "their-offer".into());
        log.lock().unwrap().fail_create_answer = true;
        let err = c.accept_call().await.unwrap_err();
        assert!(matches!(err, CallError::Media(_)));

        // Not stranded ringing with the offer consumed; the half-built
        // session is released.
        assert_eq!(c.phase(), CallPhase::Idle);
        assert_eq!(log.lock().unwrap().disposed, 1);
        assert!(matches!(c.accept_call().await, Err(CallError::NotRinging)));

        // A fresh incoming call still works after the failure.
        log.lock().unwrap().fail_create_answer = false;
        c.handle_offer("bob".into(), "retry-offer".into());
        c.accept_call().await.unwrap();
        assert_eq!(c.phase(), CallPhase::Connected);
    }

    #[tokio::test]
    async fn rejected_ice_candidate_tears_down_to_idle() {
        let (mut c, log, _frames) = coordinator();

        c.handle_offer("bob".into(), "their-offer".into());
        c.accept_call().await.unwrap();
        assert_eq!(c.phase(), CallPhase::Connected);

        log.lock().unwrap().fail_add_ice = true;
        let err = c
            .handle_remote_ice(
                "bob",
                IceCandidate {
                    candidate: "cand".into(),
                    sdp_mid: None,
                    sdp_m_line_index: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Media(_)));
        assert_eq!(c.phase(), CallPhase::Idle);
        assert_eq!(log.lock().unwrap().disposed, 1);
    }

    #[tokio::test]
    async fn transport_failure_tears_down() {
        let (mut c, log, _frames) = coordinator();

        c.start_call("bob").await.unwrap();
        c.handle_media_event(MediaEvent::ConnectionState(ConnState::Failed))
            .await;
        assert_eq!(c.phase(), CallPhase::Idle);
        assert_eq!(log.lock().unwrap().disposed, 1);
    }

    #[tokio::test]
    async fn mute_reaches_the_session() {
        let (mut c, log, _frames) = coordinator();

        c.start_call("bob").await.unwrap();
        c.set_muted(true);
        c.set_muted(false);
        assert_eq!(log.lock().unwrap().muted, [true, false]);
    }
}
