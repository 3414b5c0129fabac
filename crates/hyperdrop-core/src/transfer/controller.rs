//! Session orchestration.
//!
//! A [`TransferController`] owns one channel at a time. As a sender it
//! announces the file set and runs the [`SendPump`] over each file. As a
//! receiver it decodes incoming frames, feeds chunks to the
//! [`ReceiveAssembler`] and hands finished files to its observer.
//!
//! Everything a UI needs is published as a [`TransferSnapshot`] on a
//! `watch` channel after each state change.

use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;

use super::assembler::{AssembledFile, ChunkAccepted, ReceiveAssembler};
use super::progress::{
    ReceivedFile, Role, Session, TransferObserver, TransferProgress, TransferSnapshot,
    TransferStatus, UNKNOWN_PEER_NAME,
};
use super::pump::SendPump;
use super::speed::{self, SpeedEstimator};
use super::TransferConfig;
use crate::channel::{Channel, ChannelEvent, ChannelEvents};
use crate::error::{Error, Result};
use crate::file::{format_size, FileMetadata, OutgoingFile};
use crate::protocol::{self, ControlMessage, Frame, Message};

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Drives one transfer session over a channel.
pub struct TransferController<C: Channel, O: TransferObserver = ()> {
    config: TransferConfig,
    device_name: String,
    observer: O,
    channel: Option<C>,
    session: Option<Session>,
    assembler: ReceiveAssembler,
    speed: SpeedEstimator,
    state: TransferSnapshot,
    snapshot_tx: watch::Sender<TransferSnapshot>,
}

impl<C: Channel, O: TransferObserver> TransferController<C, O> {
    /// Create a controller with no channel attached.
    pub fn new(config: TransferConfig, device_name: impl Into<String>, observer: O) -> Self {
        let state = TransferSnapshot::default();
        let (snapshot_tx, _) = watch::channel(state.clone());
        let assembler = ReceiveAssembler::new()
            .with_strict_completion(config.strict_completion)
            .with_limits(config.max_chunks, config.max_file_size);

        Self {
            config,
            device_name: device_name.into(),
            observer,
            channel: None,
            session: None,
            assembler,
            speed: SpeedEstimator::new(now()),
            state,
            snapshot_tx,
        }
    }

    /// Wait for `channel` to open, then attach it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no `Open` event arrives within the
    /// configured connect timeout, or [`Error::ChannelFault`] if the channel
    /// fails first. The channel is closed in both cases.
    pub async fn connect(
        &mut self,
        channel: C,
        events: &mut ChannelEvents,
        role: Role,
    ) -> Result<()> {
        let limit = self.config.connect_timeout;

        match tokio::time::timeout(limit, wait_for_open(events)).await {
            Ok(Ok(())) => self.attach(channel, role).await,
            Ok(Err(e)) => {
                channel.close();
                Err(self.fail(e))
            }
            Err(_) => {
                channel.close();
                tracing::warn!("Channel did not open within {:?}", limit);
                Err(self.fail(Error::Timeout(limit.as_secs())))
            }
        }
    }

    /// Attach an open channel and announce this device.
    ///
    /// Any previous session is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFault`] if the announcement cannot be sent.
    pub async fn attach(&mut self, channel: C, role: Role) -> Result<()> {
        if self.channel.is_some() {
            tracing::debug!("Replacing the previous session");
        }
        self.reset();

        self.channel = Some(channel);
        self.session = Some(Session::new(role));
        self.publish();
        tracing::info!("Session started as {:?}", role);

        let announce = ControlMessage::DeviceName {
            name: self.device_name.clone(),
        };
        if let Err(e) = self.send_control(&announce).await {
            return Err(self.fail(e));
        }
        Ok(())
    }

    /// Send a set of files to the peer.
    ///
    /// Every file is checked against the size ceiling before anything is
    /// sent. Frames already handed to the channel are not taken back if a
    /// later send fails. Peer events stay queued until [`run`](Self::run);
    /// use [`send_files_with_events`](Self::send_files_with_events) to
    /// handle them while sending.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no open channel is attached
    /// - [`Error::InvalidState`] if this session is receiving
    /// - [`Error::CapacityExceeded`] if a file is too large
    /// - [`Error::ChannelFault`] or an I/O error if sending fails
    pub async fn send_files(&mut self, files: &[OutgoingFile]) -> Result<()> {
        self.send_files_inner(files, None).await
    }

    /// Send a set of files, handling events the peer queued in the meantime.
    ///
    /// Queued events are processed before the set and between files, so the
    /// peer's name and a dropped channel are seen while sending rather than
    /// only once [`run`](Self::run) starts.
    ///
    /// # Errors
    ///
    /// As [`send_files`](Self::send_files). A channel fault reported by a
    /// queued event ends the set early.
    pub async fn send_files_with_events(
        &mut self,
        files: &[OutgoingFile],
        events: &mut ChannelEvents,
    ) -> Result<()> {
        self.send_files_inner(files, Some(events)).await
    }

    async fn send_files_inner(
        &mut self,
        files: &[OutgoingFile],
        events: Option<&mut ChannelEvents>,
    ) -> Result<()> {
        let Some(role) = self.session.as_ref().map(|s| s.role) else {
            return Err(self.fail(Error::NotConnected));
        };
        if !self.channel.as_ref().is_some_and(|c| c.is_open()) {
            return Err(self.fail(Error::NotConnected));
        }
        if role != Role::Sender {
            return Err(Error::InvalidState(
                "only the sending side can send files".to_string(),
            ));
        }

        let mut metadata = Vec::with_capacity(files.len());
        for file in files {
            if let Some(limit) = self.config.max_file_size {
                if file.size > limit {
                    return Err(self.reject(Error::CapacityExceeded {
                        name: file.name.clone(),
                        size: file.size,
                        limit,
                    }));
                }
            }
            match FileMetadata::new(&file.name, file.size, &file.mime_type, self.config.chunk_size)
            {
                Ok(m) => metadata.push(m),
                Err(e) => return Err(self.reject(e)),
            }
        }

        match self.send_set(files, &metadata, events).await {
            Ok(()) => Ok(()),
            // Faults from queued events were already reported and tore the session down
            Err(e) if self.session.is_none() => Err(e),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn send_set(
        &mut self,
        files: &[OutgoingFile],
        metadata: &[FileMetadata],
        mut events: Option<&mut ChannelEvents>,
    ) -> Result<()> {
        let count = u32::try_from(files.len())
            .map_err(|_| Error::InvalidState("too many files in one set".to_string()))?;

        if let Some(session) = &mut self.session {
            session.total_files = count;
            session.files_completed = 0;
        }
        self.state.connection_error = None;
        self.drain_events(events.as_deref_mut())?;
        self.send_control(&ControlMessage::TotalFiles { count }).await?;
        self.publish();

        for (index, (file, meta)) in files.iter().zip(metadata).enumerate() {
            if index > 0 {
                self.drain_events(events.as_deref_mut())?;
            }
            let started = now();
            self.speed.reset(started);
            self.state.current_file_name.clone_from(&file.name);
            self.state.progress = TransferProgress::starting(file.size);
            self.publish();

            {
                let channel = self.channel.as_ref().ok_or(Error::NotConnected)?;
                let state = &mut self.state;
                let estimator = &mut self.speed;
                let snapshot_tx = &self.snapshot_tx;

                SendPump::new(channel, &self.config)
                    .send_file(file, meta, |sent| {
                        let bps = estimator.sample(sent, now());
                        state.progress.advance(sent, bps);
                        snapshot_tx.send_replace(state.clone());
                    })
                    .await?;
            }

            let elapsed = now().saturating_duration_since(started);
            if let Some(session) = &mut self.session {
                session.files_completed += 1;
            }
            self.state
                .progress
                .finish_file(speed::average_speed(file.size, elapsed));
            self.publish();
            tracing::info!(
                "Sent '{}' ({}) in {:.1}s",
                file.name,
                format_size(file.size),
                elapsed.as_secs_f64()
            );

            if index + 1 < files.len() {
                tokio::time::sleep(self.config.inter_file_delay).await;
            }
        }

        self.send_control(&ControlMessage::AllComplete).await?;
        self.state.progress.status = TransferStatus::Complete;
        self.publish();
        tracing::info!("All {} files sent", count);
        Ok(())
    }

    /// Process one event reported by the channel.
    ///
    /// Undecodable frames and frames that do not fit this session's role
    /// are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFault`] if the channel failed or closed before
    /// the transfer completed. The session is torn down in that case.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::Open => {
                tracing::debug!("Channel open");
                self.publish();
                Ok(())
            }
            ChannelEvent::Message(frame) => {
                self.handle_frame(&frame);
                Ok(())
            }
            ChannelEvent::Closed => self.handle_closed(),
            ChannelEvent::Error(reason) => {
                if self.session.is_none() {
                    tracing::debug!("Channel error after teardown: {}", reason);
                    return Ok(());
                }
                Err(self.fail(Error::ChannelFault(reason)))
            }
        }
    }

    /// Handle every event already queued, without waiting.
    fn drain_events(&mut self, events: Option<&mut ChannelEvents>) -> Result<()> {
        let Some(events) = events else {
            return Ok(());
        };
        while let Some(event) = events.try_next() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Process events until the session ends.
    ///
    /// A receiver stops once the whole set has arrived. A sender stops when
    /// the peer closes the channel. An exhausted event stream counts as a
    /// close.
    ///
    /// # Errors
    ///
    /// Returns the fault that ended the session early.
    pub async fn run(&mut self, events: &mut ChannelEvents) -> Result<()> {
        loop {
            let Some(event) = events.next().await else {
                return self.handle_event(ChannelEvent::Closed);
            };
            self.handle_event(event)?;
            if self.is_finished() {
                return Ok(());
            }
        }
    }

    /// Wait until everything queued on the channel has been delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFault`] if the channel closes first.
    pub async fn flush(&self) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(Error::NotConnected)?;
        while channel.pending_bytes() > 0 {
            if !channel.is_open() {
                return Err(Error::ChannelFault(
                    "channel closed before flushing".to_string(),
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(())
    }

    /// Tear down the channel and return every counter to zero.
    ///
    /// Watchers see a single zeroed snapshot.
    pub fn reset(&mut self) {
        self.teardown();
        self.state = TransferSnapshot::default();
        self.speed.reset(now());
        self.publish();
    }

    /// Close and drop the channel and release any partly received file.
    pub fn cleanup(&mut self) {
        self.teardown();
        self.publish();
    }

    fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
            tracing::debug!("Channel closed");
        }
        self.session = None;
        self.assembler.clear();
    }

    /// Current observable state.
    pub fn snapshot(&self) -> TransferSnapshot {
        self.state.clone()
    }

    /// Watch the observable state.
    pub fn subscribe(&self) -> watch::Receiver<TransferSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Current session status.
    pub fn status(&self) -> TransferStatus {
        self.state.progress.status
    }

    /// The attached session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The attached channel, if any.
    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    /// The observer files are delivered to.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable access to the observer.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Name announced to peers.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn is_finished(&self) -> bool {
        match &self.session {
            None => true,
            Some(session) => {
                session.role == Role::Receiver && self.status() == TransferStatus::Complete
            }
        }
    }

    async fn send_control(&self, message: &ControlMessage) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(Error::NotConnected)?;
        channel.send(protocol::control_frame(message)?).await
    }

    fn handle_frame(&mut self, frame: &Frame) {
        let Some(role) = self.session.as_ref().map(|s| s.role) else {
            tracing::debug!("Frame with no session attached, dropping");
            return;
        };

        let message = match protocol::decode_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                return;
            }
        };

        match (message, role) {
            (Message::Control(ControlMessage::DeviceName { name }), _) => {
                tracing::info!("Peer is '{}'", name);
                if let Some(session) = &mut self.session {
                    session.peer_display_name = Some(name);
                }
                self.publish();
            }
            (Message::Chunk(chunk), Role::Receiver) => {
                if let ChunkAccepted::Stored { bytes_received } = self.assembler.accept_chunk(chunk)
                {
                    let bps = self.speed.sample(bytes_received, now());
                    self.state.progress.advance(bytes_received, bps);
                    self.publish();
                }
            }
            (Message::Control(ControlMessage::TotalFiles { count }), Role::Receiver) => {
                tracing::debug!("Peer is sending {} files", count);
                if let Some(session) = &mut self.session {
                    session.total_files = count;
                    session.files_completed = 0;
                }
                self.publish();
            }
            (Message::Control(ControlMessage::FileMetadata { metadata }), Role::Receiver) => {
                self.begin_file(metadata);
            }
            (Message::Control(ControlMessage::FileComplete), Role::Receiver) => {
                self.finish_file();
            }
            (Message::Control(ControlMessage::AllComplete), Role::Receiver) => {
                if self.assembler.is_receiving() {
                    tracing::warn!("Set completed with a file still in flight, dropping it");
                    self.assembler.clear();
                }
                self.state.progress.status = TransferStatus::Complete;
                self.publish();
                tracing::info!("All files received");
            }
            (Message::Chunk(chunk), Role::Sender) => {
                tracing::debug!("Ignoring chunk {} as sender", chunk.index);
            }
            (Message::Control(control), Role::Sender) => {
                tracing::debug!("Ignoring {} as sender", control.kind());
            }
        }
    }

    fn begin_file(&mut self, metadata: FileMetadata) {
        let started = now();
        let name = metadata.name.clone();
        let size = metadata.size;

        match self.assembler.begin(metadata, started) {
            Ok(()) => {
                self.speed.reset(started);
                self.state.current_file_name = name;
                self.state.progress = TransferProgress::starting(size);
                self.publish();
            }
            Err(e) => {
                // Chunks that follow belong to the refused file
                self.assembler.clear();
                self.reject(e);
            }
        }
    }

    fn finish_file(&mut self) {
        match self.assembler.finish(now()) {
            Ok(Some(file)) => self.deliver(file),
            Ok(None) => {}
            Err(e) => {
                let message = e.user_message();
                self.observer.error(&message);
                self.publish();
            }
        }
    }

    fn deliver(&mut self, file: AssembledFile) {
        let average = speed::average_speed(file.metadata.size, file.elapsed);

        if let Some(defect) = file.defect() {
            self.observer.error(&defect.user_message());
        }

        let sender_name = self
            .session
            .as_ref()
            .and_then(|s| s.peer_display_name.clone())
            .unwrap_or_else(|| UNKNOWN_PEER_NAME.to_string());

        tracing::info!(
            "Received '{}' ({}) from {}",
            file.metadata.name,
            format_size(file.metadata.size),
            sender_name
        );

        self.observer.file_received(ReceivedFile {
            metadata: file.metadata,
            data: file.data,
            sender_name,
            transfer_speed_bps: average,
            transfer_time: file.elapsed,
            missing_chunks: file.missing,
            received_at: Utc::now(),
        });

        if let Some(session) = &mut self.session {
            session.files_completed += 1;
        }
        self.state.progress.finish_file(average);
        self.publish();
    }

    fn handle_closed(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }

        if self.status() == TransferStatus::Complete {
            tracing::debug!("Peer closed the channel");
            self.cleanup();
            return Ok(());
        }

        Err(self.fail(Error::ChannelFault(
            "channel closed before the transfer finished".to_string(),
        )))
    }

    /// Surface a per-request problem without ending the session.
    fn reject(&mut self, error: Error) -> Error {
        let message = error.user_message();
        tracing::warn!("{}", error);
        self.state.connection_error = Some(message.clone());
        self.observer.error(&message);
        self.publish();
        error
    }

    /// Record a failure; fatal ones tear the session down.
    fn fail(&mut self, error: Error) -> Error {
        let message = error.user_message();
        tracing::error!("Transfer failed: {}", error);
        self.state.progress.status = TransferStatus::Error;
        self.state.connection_error = Some(message.clone());
        self.observer.error(&message);

        if error.is_fatal() {
            self.cleanup();
        } else {
            self.publish();
        }
        error
    }

    fn publish(&mut self) {
        if let Some(session) = &self.session {
            self.state.total_files = session.total_files;
            self.state.files_completed = session.files_completed;
            self.state.peer_name.clone_from(&session.peer_display_name);
        }
        self.state.connected = self.channel.as_ref().is_some_and(|c| c.is_open());
        self.snapshot_tx.send_replace(self.state.clone());
    }
}

impl<C: Channel, O: TransferObserver> Drop for TransferController<C, O> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }
}

async fn wait_for_open(events: &mut ChannelEvents) -> Result<()> {
    loop {
        match events.next().await {
            Some(ChannelEvent::Open) => return Ok(()),
            Some(ChannelEvent::Message(_)) => {
                tracing::debug!("Frame before channel open, dropping");
            }
            Some(ChannelEvent::Error(reason)) => return Err(Error::ChannelFault(reason)),
            Some(ChannelEvent::Closed) | None => {
                return Err(Error::ChannelFault(
                    "channel closed before opening".to_string(),
                ))
            }
        }
    }
}
