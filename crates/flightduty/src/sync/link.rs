//! Transport seam for the companion link.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::protocol::CompanionMessage;
use crate::error::{Error, Result};

/// A point-to-point channel to the other device.
#[async_trait]
pub trait CompanionLink: Send + Sync {
    /// Deliver one message. Delivery is not retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Link`] when the message could not be handed to the
    /// transport.
    async fn send(&self, message: &CompanionMessage) -> Result<()>;
}

/// A [`CompanionLink`] over an in-process channel of encoded messages.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::Sender<String>,
}

impl ChannelLink {
    /// Wrap an existing sender.
    #[must_use]
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// A link and the receiving end of its channel.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl CompanionLink for ChannelLink {
    async fn send(&self, message: &CompanionMessage) -> Result<()> {
        let encoded = message.encode()?;
        self.tx
            .send(encoded)
            .await
            .map_err(|_| Error::link("companion channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeField;

    #[tokio::test]
    async fn test_channel_link_delivers_json() {
        let (link, mut rx) = ChannelLink::pair(4);
        let msg = CompanionMessage::SetTime {
            leg_index: 0,
            field: TimeField::Off,
            value: "0815".to_string(),
            seq: 1,
            timestamp: 5,
        };
        link.send(&msg).await.unwrap();

        let raw = rx.recv().await.unwrap();
        assert_eq!(CompanionMessage::decode(&raw).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_closed_channel_is_link_error() {
        let (link, rx) = ChannelLink::pair(1);
        drop(rx);
        let err = link
            .send(&CompanionMessage::AddLeg {
                origin_airport: String::new(),
                seq: 1,
                timestamp: 0,
            })
            .await
            .unwrap_err();
        assert!(err.is_link_error());
    }
}
