//! Channel handles created from a [`Socket`].

use crate::error::Error;
use crate::protocol::{Frame, Reply, events};
use crate::socket::Socket;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifier distinguishing channel handles on one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not joined.
    Closed,
    /// Join sent, awaiting reply.
    Joining,
    /// Joined; receiving events.
    Joined,
    /// Leave sent.
    Leaving,
    /// Connection lost, join timed out, or server-side crash.
    ///
    /// Errored channels are rejoined when the socket next opens. While the
    /// connection stays up nothing rejoins them automatically; call
    /// [`Channel::join`] again to retry.
    Errored,
}

/// An event received on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Value,
    /// Message ref, if the server set one.
    pub reference: Option<String>,
}

/// Routing entry the socket uses to deliver frames to a joined channel.
pub(crate) struct Membership {
    id: u64,
    topic: String,
    params: Value,
    join_ref: Mutex<Option<String>>,
    state: Mutex<ChannelState>,
    tx: Mutex<Option<mpsc::UnboundedSender<ChannelMessage>>>,
}

impl Membership {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    fn join_ref(&self) -> Option<String> {
        self.join_ref.lock().clone()
    }

    pub(crate) fn begin_join(&self, reference: String) {
        *self.join_ref.lock() = Some(reference);
        self.set_state(ChannelState::Joining);
    }

    pub(crate) fn join_frame(&self, reference: String) -> Frame {
        Frame::new(
            Some(reference.clone()),
            Some(reference),
            self.topic.clone(),
            events::JOIN,
            self.params.clone(),
        )
    }

    /// Frames for other joins of the same topic carry a different join ref.
    pub(crate) fn is_member(&self, frame: &Frame) -> bool {
        if frame.topic != self.topic {
            return false;
        }
        match &frame.join_ref {
            Some(join_ref) => self.join_ref().as_ref() == Some(join_ref),
            None => true,
        }
    }

    pub(crate) fn deliver(&self, frame: &Frame) {
        match frame.event.as_str() {
            events::CLOSE => self.set_state(ChannelState::Closed),
            events::ERROR => self.set_state(ChannelState::Errored),
            _ => {}
        }
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(ChannelMessage {
                event: frame.event.clone(),
                payload: frame.payload.clone(),
                reference: frame.reference.clone(),
            });
        }
    }

    pub(crate) fn rejoined(&self, reply: &Reply) {
        if reply.is_ok() {
            debug!(topic = %self.topic, "channel rejoined");
            self.set_state(ChannelState::Joined);
        } else {
            warn!(topic = %self.topic, status = %reply.status, "channel rejoin refused");
            self.set_state(ChannelState::Errored);
        }
    }

    pub(crate) fn connection_lost(&self) {
        let mut state = self.state.lock();
        if matches!(*state, ChannelState::Joined | ChannelState::Joining) {
            *state = ChannelState::Errored;
        }
    }
}

/// A named subscription on the socket.
///
/// Creating a channel does not touch the socket; [`Channel::join`] registers
/// it for inbound events. Dropping the handle unregisters it without sending
/// a leave.
pub struct Channel {
    socket: Socket,
    membership: Arc<Membership>,
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.membership.id)
            .field("topic", &self.membership.topic)
            .field("state", &self.membership.state())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(socket: Socket, id: u64, topic: String, params: Value) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let membership = Arc::new(Membership {
            id,
            topic,
            params,
            join_ref: Mutex::new(None),
            state: Mutex::new(ChannelState::Closed),
            tx: Mutex::new(Some(tx)),
        });
        Self {
            socket,
            membership,
            rx,
        }
    }

    /// Handle identifier.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        ChannelId(self.membership.id)
    }

    /// Channel topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.membership.topic
    }

    /// Parameters sent with every join.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.membership.params
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.membership.state()
    }

    /// Joins the channel and returns the server's join response.
    ///
    /// # Errors
    /// Returns error if the channel is already joined, the server refuses the
    /// join, no reply arrives in time, or the connection closes.
    pub async fn join(&mut self) -> Result<Value, Error> {
        if matches!(
            self.state(),
            ChannelState::Joining | ChannelState::Joined
        ) {
            return Err(Error::AlreadyJoined(self.membership.topic.clone()));
        }

        {
            let mut tx = self.membership.tx.lock();
            if tx.is_none() {
                let (new_tx, new_rx) = mpsc::unbounded_channel();
                *tx = Some(new_tx);
                self.rx = new_rx;
            }
        }

        let reference = self.socket.make_ref();
        self.membership.begin_join(reference.clone());
        self.socket.register(Arc::clone(&self.membership));

        let frame = self.membership.join_frame(reference);
        match self.socket.request(frame).await {
            Ok(reply) => match reply.into_result() {
                Ok(response) => {
                    self.membership.set_state(ChannelState::Joined);
                    debug!(topic = %self.membership.topic, "channel joined");
                    Ok(response)
                }
                Err(err) => {
                    self.socket.unregister(self.membership.id);
                    self.membership.set_state(ChannelState::Closed);
                    Err(err)
                }
            },
            Err(err) => {
                self.membership.set_state(ChannelState::Errored);
                Err(err)
            }
        }
    }

    /// Pushes an event and returns the reply body.
    ///
    /// # Errors
    /// Returns error if the channel is not joined, the server replies with an
    /// error, or no reply arrives in time.
    pub async fn push(&self, event: &str, payload: Value) -> Result<Value, Error> {
        if self.state() != ChannelState::Joined {
            return Err(Error::NotJoined(self.membership.topic.clone()));
        }
        let frame = Frame::new(
            self.membership.join_ref(),
            Some(self.socket.make_ref()),
            self.membership.topic.clone(),
            event,
            payload,
        );
        self.socket.request(frame).await?.into_result()
    }

    /// Leaves the channel. The channel is closed afterwards even if the
    /// server does not answer.
    ///
    /// # Errors
    /// Returns error if no reply arrives in time or the connection closes.
    pub async fn leave(&mut self) -> Result<(), Error> {
        if self.state() == ChannelState::Closed {
            return Ok(());
        }
        self.membership.set_state(ChannelState::Leaving);
        let frame = Frame::new(
            self.membership.join_ref(),
            Some(self.socket.make_ref()),
            self.membership.topic.clone(),
            events::LEAVE,
            Value::Object(Default::default()),
        );
        let result = self.socket.request(frame).await;

        self.socket.unregister(self.membership.id);
        self.membership.set_state(ChannelState::Closed);
        *self.membership.join_ref.lock() = None;
        self.membership.tx.lock().take();

        result.map(|_| ())
    }

    #[cfg(test)]
    pub(crate) fn membership_for_tests(&self) -> Arc<Membership> {
        Arc::clone(&self.membership)
    }

    /// Receives the next event. Returns `None` once the channel has been left
    /// and all buffered events were consumed.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.socket.unregister(self.membership.id);
    }
}
