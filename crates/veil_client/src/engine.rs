//! The engine: single-reader dispatch of inbound frames plus every
//! outbound operation the application performs.
//!
//! One `run` task owns the inbound frame stream and the media event
//! stream; all stateful reactions (persistence, receipts, reassembly,
//! call phase changes) happen on that task, so none of the per-frame
//! handlers race each other. Outbound operations go through the shared
//! [`FrameSink`] and may be called from anywhere.
//!
//! Sends that exhaust their retry budget are logged, not errored: a
//! message is persisted locally whether or not the relay confirmed the
//! socket write, and the missing `delivered` receipt is what tells the
//! user it has not arrived.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use veil_crypto::{chunker, hybrid, Identity, PeerPublicKey};
use veil_proto::{Frame, MessageBody, ReceiptKind};
use veil_store::{MessageKind, NewMessage, Store};

use crate::call::{CallCoordinator, IceCandidate, MediaEngine, MediaEvent};
use crate::channel::FrameSink;
use crate::config::{mime_allowed, EngineConfig};
use crate::error::ClientError;
use crate::receipts::ReceiptTracker;
use crate::transfer::{IngestOutcome, Reassembler};

pub struct Engine<S: FrameSink + Clone, E: MediaEngine> {
    identity: Arc<Identity>,
    store: Arc<Store>,
    sink: S,
    config: EngineConfig,
    reassembler: Reassembler,
    receipts: ReceiptTracker,
    calls: CallCoordinator<E, S>,
    media_rx: Option<mpsc::UnboundedReceiver<MediaEvent>>,
    /// Conversation the user is looking at; its inbound messages are
    /// marked read on arrival and acknowledged with `read_all`.
    current_conversation: Option<String>,
}

impl<S: FrameSink + Clone, E: MediaEngine> Engine<S, E> {
    pub fn new(
        identity: Arc<Identity>,
        store: Arc<Store>,
        sink: S,
        media: E,
        config: EngineConfig,
    ) -> Self {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let calls =
            CallCoordinator::new(media, sink.clone(), identity.peer_id.clone(), media_tx);
        Self {
            receipts: ReceiptTracker::new(store.clone()),
            reassembler: Reassembler::new(),
            calls,
            media_rx: Some(media_rx),
            identity,
            store,
            sink,
            config,
            current_conversation: None,
        }
    }

    pub fn calls(&mut self) -> &mut CallCoordinator<E, S> {
        &mut self.calls
    }

    /// Dispatcher loop: consumes the inbound frame stream until the
    /// channel closes, interleaving media engine events. A failed frame
    /// is logged and skipped; it never takes the loop down.
    pub async fn run(&mut self, mut frames: mpsc::Receiver<Frame>) {
        let Some(mut media_rx) = self.media_rx.take() else {
            warn!("engine run called twice");
            return;
        };
        loop {
            tokio::select! {
                maybe_frame = frames.recv() => match maybe_frame {
                    Some(frame) => {
                        if let Err(e) = self.handle_frame(frame).await {
                            warn!(error = %e, "frame handling failed");
                        }
                    }
                    None => {
                        debug!("inbound stream closed, dispatcher exiting");
                        break;
                    }
                },
                maybe_event = media_rx.recv() => {
                    if let Some(event) = maybe_event {
                        self.calls.handle_media_event(event).await;
                    }
                }
            }
        }
    }

    // ── Inbound dispatch ──

    pub async fn handle_frame(&mut self, frame: Frame) -> Result<(), ClientError> {
        match frame {
            Frame::Message { from, payload, receipt_type, message_ref_id, .. } => {
                match Frame::message_body(payload, receipt_type, message_ref_id)? {
                    MessageBody::Envelope(envelope) => {
                        self.handle_inbound_message(from, envelope, message_ref_id).await?
                    }
                    MessageBody::Receipt { kind, message_ref_id } => match kind {
                        ReceiptKind::Delivered => match message_ref_id {
                            Some(id) => self.receipts.apply_delivered(id).await?,
                            None => warn!(%from, "delivered receipt without message_ref_id"),
                        },
                        ReceiptKind::ReadAll => self.receipts.apply_read_all(&from).await?,
                    },
                }
            }
            Frame::FileChunk { from, payload, .. } => {
                self.handle_file_chunk(from, payload).await?
            }
            Frame::Status { from, content, payload } => {
                match (content, payload) {
                    (Some(text), _) => {
                        // Only stored for known contacts; our own posts are
                        // already recorded locally and echoes must not dupe.
                        if from != self.identity.peer_id
                            && self.store.contact(&from).await?.is_some()
                        {
                            self.store.insert_status(&from, &text).await?;
                        } else {
                            debug!(%from, "status from unknown peer dropped");
                        }
                    }
                    (None, Some(_)) => {
                        debug!(%from, "encrypted status payload unsupported, dropped")
                    }
                    (None, None) => debug!(%from, "empty status frame dropped"),
                }
            }
            Frame::PublicKeyResponse { target, public_key } => {
                // Validate before trusting: a key that does not parse is
                // never written over a pending slot.
                match PeerPublicKey::from_b64(&public_key) {
                    Ok(_) => {
                        self.store.set_public_key(&target, &public_key).await?;
                        info!(peer = %target, "public key recorded");
                    }
                    Err(e) => warn!(peer = %target, error = %e, "unusable public key ignored"),
                }
            }
            Frame::WebrtcOffer { from, sdp, .. } => self.calls.handle_offer(from, sdp),
            Frame::WebrtcAnswer { from, sdp, .. } => {
                self.calls.handle_answer(&from, &sdp).await?
            }
            Frame::WebrtcIce { from, candidate, sdp_mid, sdp_m_line_index, .. } => {
                self.calls
                    .handle_remote_ice(
                        &from,
                        IceCandidate { candidate, sdp_mid, sdp_m_line_index },
                    )
                    .await?
            }
            Frame::Registered { peer_id } => info!(%peer_id, "registration confirmed"),
            Frame::DeliveryFailed { to, reason } => {
                warn!(peer = %to, %reason, "relay could not deliver")
            }
            Frame::Error { message } => warn!(%message, "relay error"),
            Frame::Register { .. } | Frame::GetPublicKey { .. } => {
                debug!("client-to-server frame received, ignored")
            }
            Frame::Unknown => debug!("unknown frame kind ignored"),
        }
        Ok(())
    }

    async fn handle_inbound_message(
        &mut self,
        from: String,
        envelope: veil_crypto::EncryptedEnvelope,
        message_ref_id: Option<i64>,
    ) -> Result<(), ClientError> {
        let plaintext = match hybrid::decrypt(&envelope, &self.identity) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Sender holds a key that is not ours; push our current
                // one back into circulation and drop the item.
                warn!(%from, error = %e, "message decrypt failed, refreshing keys");
                self.request_public_key(&from).await;
                return Ok(());
            }
        };
        let text = String::from_utf8_lossy(&plaintext).into_owned();
        let viewing = self.current_conversation.as_deref() == Some(from.as_str());

        self.store
            .insert_message(NewMessage {
                conversation_id: from.clone(),
                sender: from.clone(),
                content: text,
                kind: MessageKind::Text,
                file_path: None,
                sent_by_me: false,
                is_delivered: true,
                is_read: viewing,
            })
            .await?;

        // Delivery ack echoes the sender's rowid so they can correlate.
        self.sink
            .send(Frame::Message {
                from: self.identity.peer_id.clone(),
                to: from.clone(),
                payload: None,
                receipt_type: Some(ReceiptKind::Delivered),
                message_ref_id,
            })
            .await;
        if viewing {
            self.send_read_all(&from).await;
        }
        Ok(())
    }

    async fn handle_file_chunk(
        &mut self,
        from: String,
        chunk: veil_crypto::EncryptedChunk,
    ) -> Result<(), ClientError> {
        let plaintext = match chunker::decrypt_chunk(&chunk, &self.identity) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%from, transfer = %chunk.transfer_id, error = %e,
                    "chunk decrypt failed, aborting transfer");
                self.reassembler.fail(&from, &chunk);
                self.request_public_key(&from).await;
                return Ok(());
            }
        };

        match self.reassembler.ingest_chunk(&from, &chunk, plaintext) {
            IngestOutcome::InProgress { received, chunk_count } => {
                debug!(%from, transfer = %chunk.transfer_id, received, chunk_count,
                    "chunk stored");
            }
            IngestOutcome::Completed(done) => {
                let path = self.inbox_path(&done.file_name).await;
                // The reassembler already released this transfer; an
                // unwritable inbox means the file is gone, so say so
                // loudly instead of erroring the dispatch loop.
                if let Err(e) = tokio::fs::write(&path, &done.bytes).await {
                    error!(%from, file = %done.file_name, path = %path.display(),
                        error = %e, "completed transfer could not be written, dropped");
                    return Ok(());
                }
                info!(%from, file = %done.file_name, size = done.bytes.len(),
                    "file received");

                let viewing = self.current_conversation.as_deref() == Some(from.as_str());
                let kind = if done.mime_type.starts_with("image/") {
                    MessageKind::Image
                } else {
                    MessageKind::File
                };
                self.store
                    .insert_message(NewMessage {
                        conversation_id: from.clone(),
                        sender: from,
                        content: done.file_name,
                        kind,
                        file_path: Some(path.to_string_lossy().into_owned()),
                        sent_by_me: false,
                        is_delivered: true,
                        is_read: viewing,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Destination path for a completed transfer. Path components in the
    /// sender-supplied name are stripped; an existing file is never
    /// overwritten, the new one gets a unique prefix instead.
    async fn inbox_path(&self, file_name: &str) -> PathBuf {
        let base = std::path::Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "download.bin".to_string());
        let candidate = self.config.inbox_dir.join(&base);
        match tokio::fs::try_exists(&candidate).await {
            Ok(false) => candidate,
            _ => self.config.inbox_dir.join(format!("{}-{base}", Uuid::new_v4())),
        }
    }

    // ── Outbound operations ──

    /// Encrypt and send a text message; returns the stored rowid.
    ///
    /// If the contact's key is still pending, a key request goes out and
    /// the send is refused; nothing is persisted for a blocked message.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<i64, ClientError> {
        let key = self.recipient_key(to).await?;
        let id = self
            .receipts
            .record_outbound(to, &self.identity.peer_id, text, MessageKind::Text, None)
            .await?;
        let envelope = hybrid::encrypt(text.as_bytes(), &key)?;
        let sent = self
            .sink
            .send(Frame::Message {
                from: self.identity.peer_id.clone(),
                to: to.to_string(),
                payload: Some(envelope),
                receipt_type: None,
                message_ref_id: Some(id),
            })
            .await;
        if !sent {
            // Kept locally regardless; the UI shows it undelivered until
            // a receipt arrives.
            warn!(peer = %to, message_id = id, "message stored but not confirmed sent");
        }
        Ok(id)
    }

    /// Chunk, encrypt and send a file; returns the stored rowid.
    pub async fn send_file(
        &self,
        to: &str,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
    ) -> Result<i64, ClientError> {
        if !mime_allowed(mime_type) {
            return Err(ClientError::UnsupportedMime(mime_type.to_string()));
        }
        let key = self.recipient_key(to).await?;
        let transfer_id = Uuid::new_v4().to_string();
        let chunks = chunker::encrypt_file(bytes, file_name, mime_type, &key, &transfer_id)?;
        let total = chunks.len();

        for chunk in chunks {
            let index = chunk.chunk_index;
            let sent = self
                .sink
                .send_chunk(Frame::FileChunk {
                    from: self.identity.peer_id.clone(),
                    to: to.to_string(),
                    payload: chunk,
                })
                .await;
            if !sent {
                warn!(peer = %to, %transfer_id, index, "chunk not confirmed sent");
            }
            if index as usize + 1 < total {
                tokio::time::sleep(self.config.chunk_pause).await;
            }
        }

        let kind = if mime_type.starts_with("image/") {
            MessageKind::Image
        } else {
            MessageKind::File
        };
        let id = self
            .receipts
            .record_outbound(
                to,
                &self.identity.peer_id,
                &format!("[sent: {file_name}]"),
                kind,
                None,
            )
            .await?;
        info!(peer = %to, %transfer_id, chunks = total, "file sent");
        Ok(id)
    }

    /// Post an ephemeral status, stored locally and broadcast in clear.
    pub async fn post_status(&self, text: &str) -> Result<i64, ClientError> {
        let id = self.store.insert_status(&self.identity.peer_id, text).await?;
        let sent = self
            .sink
            .send(Frame::Status {
                from: self.identity.peer_id.clone(),
                content: Some(text.to_string()),
                payload: None,
            })
            .await;
        if !sent {
            warn!("status stored but not confirmed sent");
        }
        Ok(id)
    }

    /// Add a contact with a pending key and immediately ask the relay
    /// for their public key.
    pub async fn add_contact(&self, peer_id: &str, nickname: &str) -> Result<(), ClientError> {
        self.store.insert_contact(peer_id, nickname).await?;
        self.request_public_key(peer_id).await;
        Ok(())
    }

    pub async fn request_public_key(&self, target: &str) {
        self.sink
            .send(Frame::GetPublicKey {
                from: self.identity.peer_id.clone(),
                target: target.to_string(),
            })
            .await;
    }

    /// The user opened a conversation: unread inbound messages become
    /// read and the peer is told with one `read_all` receipt.
    pub async fn open_conversation(&mut self, peer_id: &str) -> Result<(), ClientError> {
        self.current_conversation = Some(peer_id.to_string());
        self.store.mark_incoming_read(peer_id).await?;
        self.send_read_all(peer_id).await;
        Ok(())
    }

    pub fn close_conversation(&mut self) {
        self.current_conversation = None;
    }

    /// Periodic purge of expired statuses; runs until aborted.
    pub fn spawn_status_purge(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let period = self.config.status_purge_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = store.purge_expired_statuses().await {
                    warn!(error = %e, "status purge failed");
                }
            }
        })
    }

    // ── Helpers ──

    async fn recipient_key(&self, to: &str) -> Result<PeerPublicKey, ClientError> {
        let contact = self
            .store
            .contact(to)
            .await?
            .ok_or_else(|| ClientError::UnknownContact(to.to_string()))?;
        if contact.key_pending() {
            self.request_public_key(to).await;
            return Err(ClientError::KeyPending(to.to_string()));
        }
        Ok(PeerPublicKey::from_b64(&contact.public_key)?)
    }

    async fn send_read_all(&self, to: &str) {
        self.sink
            .send(Frame::Message {
                from: self.identity.peer_id.clone(),
                to: to.to_string(),
                payload: None,
                receipt_type: Some(ReceiptKind::ReadAll),
                message_ref_id: None,
            })
            .await;
    }
}
