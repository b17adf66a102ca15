//! Correlates requests with broker acknowledgements
//!
//! rumqttc assigns packet ids inside its event loop, so a request's id is only
//! known once the matching `Outgoing` event is polled. Requests of one kind
//! are handed to the event loop in call order, which lets the tracker pair
//! each `Outgoing` event with the oldest unmatched request of that kind.

use super::message_handler::{Ack, SentRequest};
use crate::transport::{QosLevel, TransportError};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::warn;

pub type AckSender = oneshot::Sender<Result<(), TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
    Publish(QosLevel),
}

impl RequestKind {
    fn matches(&self, sent: &SentRequest) -> bool {
        matches!(
            (self, sent),
            (RequestKind::Subscribe, SentRequest::Subscribe(_))
                | (RequestKind::Unsubscribe, SentRequest::Unsubscribe(_))
                | (RequestKind::Publish(_), SentRequest::Publish(_))
        )
    }
}

#[derive(Default)]
pub struct AckTracker {
    awaiting_id: VecDeque<(RequestKind, AckSender)>,
    subscribes: HashMap<u16, AckSender>,
    unsubscribes: HashMap<u16, AckSender>,
    publishes: HashMap<u16, AckSender>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request about to be handed to the event loop
    pub fn enqueue(&mut self, kind: RequestKind, waiter: AckSender) {
        self.awaiting_id.push_back((kind, waiter));
    }

    /// Drop the most recently enqueued request after it failed to send
    pub fn discard_newest(&mut self) {
        self.awaiting_id.pop_back();
    }

    pub fn on_sent(&mut self, sent: SentRequest) {
        let Some(position) = self.awaiting_id.iter().position(|(k, _)| k.matches(&sent)) else {
            // Retransmissions and resubscriptions issued by rumqttc itself
            return;
        };
        let Some((kind, waiter)) = self.awaiting_id.remove(position) else {
            return;
        };

        match (kind, sent) {
            (RequestKind::Subscribe, SentRequest::Subscribe(pkid)) => {
                self.subscribes.insert(pkid, waiter);
            }
            (RequestKind::Unsubscribe, SentRequest::Unsubscribe(pkid)) => {
                self.unsubscribes.insert(pkid, waiter);
            }
            (RequestKind::Publish(QosLevel::AtMostOnce), SentRequest::Publish(_)) => {
                let _ = waiter.send(Ok(()));
            }
            (RequestKind::Publish(_), SentRequest::Publish(pkid)) => {
                self.publishes.insert(pkid, waiter);
            }
            _ => {}
        }
    }

    pub fn on_ack(&mut self, ack: Ack) {
        let (waiter, outcome) = match ack {
            Ack::Subscribe { pkid, outcome } => (self.subscribes.remove(&pkid), outcome),
            Ack::Unsubscribe { pkid, outcome } => (self.unsubscribes.remove(&pkid), outcome),
            Ack::PublishAck { pkid, outcome } | Ack::PublishComplete { pkid, outcome } => {
                (self.publishes.remove(&pkid), outcome)
            }
        };

        match waiter {
            Some(waiter) => {
                let _ = waiter.send(outcome.map_err(TransportError::Rejected));
            }
            None => warn!("Acknowledgement for unknown packet: {:?}", outcome),
        }
    }

    /// Fail every outstanding request; the session is gone
    pub fn fail_all(&mut self) {
        let waiters = self
            .awaiting_id
            .drain(..)
            .map(|(_, waiter)| waiter)
            .chain(self.subscribes.drain().map(|(_, w)| w))
            .chain(self.unsubscribes.drain().map(|(_, w)| w))
            .chain(self.publishes.drain().map(|(_, w)| w));
        for waiter in waiters {
            let _ = waiter.send(Err(TransportError::SessionClosed));
        }
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.awaiting_id.len()
            + self.subscribes.len()
            + self.unsubscribes.len()
            + self.publishes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter() -> (AckSender, oneshot::Receiver<Result<(), TransportError>>) {
        oneshot::channel()
    }

    #[test]
    fn test_subscribe_resolves_on_suback() {
        let mut tracker = AckTracker::new();
        let (tx, mut rx) = waiter();
        tracker.enqueue(RequestKind::Subscribe, tx);

        tracker.on_sent(SentRequest::Subscribe(4));
        assert!(rx.try_recv().is_err(), "still waiting for SubAck");

        tracker.on_ack(Ack::Subscribe {
            pkid: 4,
            outcome: Ok(()),
        });
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_qos0_publish_resolves_when_sent() {
        let mut tracker = AckTracker::new();
        let (tx, mut rx) = waiter();
        tracker.enqueue(RequestKind::Publish(QosLevel::AtMostOnce), tx);

        tracker.on_sent(SentRequest::Publish(0));
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_requests_pair_by_kind_in_order() {
        let mut tracker = AckTracker::new();
        let (sub_tx, mut sub_rx) = waiter();
        let (pub_tx, mut pub_rx) = waiter();
        let (unsub_tx, mut unsub_rx) = waiter();
        tracker.enqueue(RequestKind::Subscribe, sub_tx);
        tracker.enqueue(RequestKind::Publish(QosLevel::AtLeastOnce), pub_tx);
        tracker.enqueue(RequestKind::Unsubscribe, unsub_tx);

        tracker.on_sent(SentRequest::Unsubscribe(3));
        tracker.on_sent(SentRequest::Publish(2));
        tracker.on_sent(SentRequest::Subscribe(1));

        tracker.on_ack(Ack::PublishAck {
            pkid: 2,
            outcome: Ok(()),
        });
        tracker.on_ack(Ack::Unsubscribe {
            pkid: 3,
            outcome: Err("no subscription existed".to_string()),
        });

        assert!(matches!(pub_rx.try_recv(), Ok(Ok(()))));
        assert!(matches!(
            unsub_rx.try_recv(),
            Ok(Err(TransportError::Rejected(_)))
        ));
        assert!(sub_rx.try_recv().is_err());
        assert_eq!(tracker.outstanding(), 1);
    }

    #[test]
    fn test_fail_all_and_discard() {
        let mut tracker = AckTracker::new();
        let (a, mut a_rx) = waiter();
        let (b, mut b_rx) = waiter();
        let (c, _c_rx) = waiter();
        tracker.enqueue(RequestKind::Subscribe, a);
        tracker.on_sent(SentRequest::Subscribe(1));
        tracker.enqueue(RequestKind::Publish(QosLevel::ExactlyOnce), b);
        tracker.enqueue(RequestKind::Unsubscribe, c);
        tracker.discard_newest();

        tracker.fail_all();

        assert!(matches!(a_rx.try_recv(), Ok(Err(TransportError::SessionClosed))));
        assert!(matches!(b_rx.try_recv(), Ok(Err(TransportError::SessionClosed))));
        assert_eq!(tracker.outstanding(), 0);
    }
}
