//! Typed per-channel streams demultiplexed from the shared inbound broadcast.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::subscription::SubscriptionMessage;

/// Live messages for one channel, decoded as `T`.
///
/// Delivery is at-most-once: messages published before the stream was
/// created, or dropped because the consumer lagged, are not replayed.
/// Messages that fail to decode are logged and skipped.
pub struct ChannelStream<T> {
    channel: String,
    inner: Pin<Box<dyn Stream<Item = T> + Send>>,
}

impl<T> ChannelStream<T> {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl<T: DeserializeOwned + Send + 'static> ChannelStream<T> {
    pub(crate) fn new(mut rx: broadcast::Receiver<SubscriptionMessage>, channel: String) -> Self {
        let wanted = channel.clone();
        let inner = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(message) if message.channel == wanted => {
                        match serde_json::from_value::<T>(message.data) {
                            Ok(item) => yield item,
                            Err(e) => tracing::warn!("Undecodable message on {}: {}", wanted, e),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Stream for {} lagged; {} message(s) dropped", wanted, missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Self {
            channel,
            inner: Box::pin(inner),
        }
    }
}

impl<T> Stream for ChannelStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Tick {
        last_price: f64,
    }

    fn message(channel: &str, data: serde_json::Value) -> SubscriptionMessage {
        SubscriptionMessage {
            channel: channel.into(),
            data,
        }
    }

    #[tokio::test]
    async fn test_demultiplex_by_channel() {
        let (tx, _) = broadcast::channel(16);
        let mut btc = ChannelStream::<Tick>::new(tx.subscribe(), "ticker.BTC-PERPETUAL.100ms".into());
        let mut eth = ChannelStream::<Tick>::new(tx.subscribe(), "ticker.ETH-PERPETUAL.100ms".into());

        tx.send(message("ticker.ETH-PERPETUAL.100ms", json!({"last_price": 2.0}))).unwrap();
        tx.send(message("ticker.BTC-PERPETUAL.100ms", json!({"last_price": 1.0}))).unwrap();

        assert_eq!(btc.next().await, Some(Tick { last_price: 1.0 }));
        assert_eq!(eth.next().await, Some(Tick { last_price: 2.0 }));
        assert_eq!(btc.channel(), "ticker.BTC-PERPETUAL.100ms");
    }

    #[tokio::test]
    async fn test_undecodable_messages_skipped() {
        let (tx, _) = broadcast::channel(16);
        let mut stream = ChannelStream::<Tick>::new(tx.subscribe(), "c".into());

        tx.send(message("c", json!({"nope": true}))).unwrap();
        tx.send(message("c", json!({"last_price": 3.5}))).unwrap();

        assert_eq!(stream.next().await, Some(Tick { last_price: 3.5 }));
    }

    #[tokio::test]
    async fn test_ends_when_source_closes() {
        let (tx, _) = broadcast::channel::<SubscriptionMessage>(16);
        let mut stream = ChannelStream::<Tick>::new(tx.subscribe(), "c".into());
        drop(tx);
        assert_eq!(stream.next().await, None);
    }
}
