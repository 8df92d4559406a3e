//! Single-slot, drop-oldest frame handoff between producer and consumers
//!
//! The producer must never stall on a slow network consumer, and a slow
//! consumer always observes the freshest frame rather than a backlog. Built
//! on `tokio::sync::watch`, which gives exactly that keep-latest contract
//! with any number of independent subscribers.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Empty,
    Frame(u64, Bytes),
    Closed,
}

/// Producer side of the broadcast channel.
#[derive(Debug)]
pub struct FrameBroadcastChannel {
    tx: watch::Sender<Slot>,
    seq: AtomicU64,
}

impl FrameBroadcastChannel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Slot::Empty);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Publishes a frame, overwriting any unconsumed pending one. Never
    /// blocks and never fails; publishing after close is a no-op.
    pub fn publish(&self, frame: Bytes) {
        if matches!(*self.tx.borrow(), Slot::Closed) {
            return;
        }
        // The sequence number makes every publish observable even when two
        // consecutive frames carry identical bytes.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.tx.send(Slot::Frame(seq, frame));
    }

    /// Creates an independent subscriber. Each subscriber sees the freshest
    /// frame published after it last woke; none can corrupt the slot for
    /// the others.
    pub fn subscribe(&self) -> FrameReceiver {
        FrameReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Closes the channel, waking every blocked `take()` with `None`.
    pub fn close(&self) {
        let _ = self.tx.send(Slot::Closed);
    }
}

impl Default for FrameBroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameBroadcastChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer handle. Cheap to clone per connection.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<Slot>,
}

impl FrameReceiver {
    /// Suspends until a frame is available, returning the most recent one
    /// published. Returns `None` once the channel is closed.
    ///
    /// Cancel-safe: dropping the future leaves the subscriber intact.
    pub async fn take(&mut self) -> Option<Bytes> {
        loop {
            {
                let slot = self.rx.borrow_and_update();
                match &*slot {
                    Slot::Frame(_, frame) if slot.has_changed() => return Some(frame.clone()),
                    Slot::Closed => return None,
                    _ => {}
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
            let slot = self.rx.borrow_and_update();
            match &*slot {
                Slot::Frame(_, frame) => return Some(frame.clone()),
                Slot::Closed => return None,
                Slot::Empty => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn take_returns_only_the_latest() {
        let chan = FrameBroadcastChannel::new();
        let mut rx = chan.subscribe();

        chan.publish(Bytes::from_static(b"f1"));
        chan.publish(Bytes::from_static(b"f2"));
        chan.publish(Bytes::from_static(b"f3"));

        assert_eq!(rx.take().await.unwrap(), Bytes::from_static(b"f3"));
    }

    #[tokio::test]
    async fn take_suspends_until_publish() {
        let chan = FrameBroadcastChannel::new();
        let mut rx = chan.subscribe();

        let waiter = tokio::spawn(async move { rx.take().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        chan.publish(Bytes::from_static(b"frame"));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap(), Bytes::from_static(b"frame"));
    }

    #[tokio::test]
    async fn identical_payloads_are_distinct_publishes() {
        let chan = FrameBroadcastChannel::new();
        let mut rx = chan.subscribe();

        chan.publish(Bytes::from_static(b"same"));
        assert!(rx.take().await.is_some());

        chan.publish(Bytes::from_static(b"same"));
        let got = tokio::time::timeout(Duration::from_secs(1), rx.take())
            .await
            .expect("second identical publish must wake the taker");
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn close_wakes_blocked_takers() {
        let chan = FrameBroadcastChannel::new();
        chan.publish(Bytes::from_static(b"seen"));

        let mut rx1 = chan.subscribe();
        let mut rx2 = chan.subscribe();
        let w1 = tokio::spawn(async move { rx1.take().await });
        let w2 = tokio::spawn(async move { rx2.take().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        chan.close();
        assert!(w1.await.unwrap().is_none());
        assert!(w2.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_are_independent() {
        let chan = FrameBroadcastChannel::new();
        let mut rx1 = chan.subscribe();
        let mut rx2 = chan.subscribe();

        chan.publish(Bytes::from_static(b"a"));
        assert_eq!(rx1.take().await.unwrap(), Bytes::from_static(b"a"));
        // A slow subscriber still gets the same frame.
        assert_eq!(rx2.take().await.unwrap(), Bytes::from_static(b"a"));

        chan.publish(Bytes::from_static(b"b"));
        assert_eq!(rx1.take().await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(rx2.take().await.unwrap(), Bytes::from_static(b"b"));
    }
}
