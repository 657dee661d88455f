use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::InboxCapacity;
use crate::error::{Error, Result};
use crate::message::Message;

pub(crate) enum InboxSender {
    Unbounded(mpsc::UnboundedSender<Message>),
    Bounded(mpsc::Sender<Message>),
}

pub(crate) enum InboxReceiver {
    Unbounded(mpsc::UnboundedReceiver<Message>),
    Bounded(mpsc::Receiver<Message>),
}

pub(crate) fn inbox(capacity: InboxCapacity) -> (InboxSender, InboxReceiver) {
    match capacity {
        InboxCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (InboxSender::Unbounded(tx), InboxReceiver::Unbounded(rx))
        }
        InboxCapacity::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (InboxSender::Bounded(tx), InboxReceiver::Bounded(rx))
        }
    }
}

impl InboxSender {
    /// Enqueues without waiting.
    pub(crate) fn push(&self, subscriber: &str, message: Message) -> Result<()> {
        match self {
            Self::Unbounded(tx) => tx
                .send(message)
                .map_err(|_| Error::InboxClosed(subscriber.to_string())),
            Self::Bounded(tx) => tx.try_send(message).map_err(|error| match error {
                TrySendError::Full(_) => Error::InboxFull(subscriber.to_string()),
                TrySendError::Closed(_) => Error::InboxClosed(subscriber.to_string()),
            }),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Self::Unbounded(tx) => tx.is_closed(),
            Self::Bounded(tx) => tx.is_closed(),
        }
    }
}

impl InboxReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }

    /// Rejects further sends; already queued messages can still be received.
    pub(crate) fn close(&mut self) {
        match self {
            Self::Unbounded(rx) => rx.close(),
            Self::Bounded(rx) => rx.close(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Unbounded(rx) => rx.len(),
            Self::Bounded(rx) => rx.len(),
        }
    }
}
