use std::fmt::{Display, Formatter};
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::task::Poll;

use tokio::sync::oneshot;

/// Why exclusivity ended before the run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Session TTL lapsed without a successful renewal.
    SessionExpired,
    /// Lease key now names a different session.
    LeaseSuperseded,
    /// Operator asked the run to stop.
    OperatorShutdown,
}

impl RevocationReason {
    /// Returns stable reason value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionExpired => "session_expired",
            Self::LeaseSuperseded => "lease_superseded",
            Self::OperatorShutdown => "operator_shutdown",
        }
    }
}

impl Display for RevocationReason {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Sending half of a revocation signal. Firing consumes it.
#[derive(Debug)]
pub struct RevocationNotifier {
    sender: oneshot::Sender<RevocationReason>,
}

impl RevocationNotifier {
    /// Fires the signal; returns false when nobody is listening anymore.
    pub fn fire(self, reason: RevocationReason) -> bool {
        self.sender.send(reason).is_ok()
    }

    /// Returns whether the receiving side was dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// One-shot notification that the run lost its right to continue.
///
/// A signal may merge several sources; the first source to fire wins and
/// the signal never fires again. Sources whose notifier was dropped without
/// firing are ignored, so a signal with no live source stays pending.
#[derive(Debug, Default)]
pub struct RevocationSignal {
    receivers: Vec<oneshot::Receiver<RevocationReason>>,
}

/// Creates a connected notifier and signal.
#[must_use]
pub fn revocation_channel() -> (RevocationNotifier, RevocationSignal) {
    let (sender, receiver) = oneshot::channel();
    (
        RevocationNotifier { sender },
        RevocationSignal {
            receivers: vec![receiver],
        },
    )
}

impl RevocationSignal {
    /// Returns a signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Combines two signals into one that fires on whichever fires first.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.receivers.extend(other.receivers);
        self
    }

    /// Returns the reason if the signal already fired, without waiting.
    pub fn try_fired(&mut self) -> Option<RevocationReason> {
        let mut fired = None;
        self.receivers.retain_mut(|receiver| {
            if fired.is_some() {
                return true;
            }
            match receiver.try_recv() {
                Ok(reason) => {
                    fired = Some(reason);
                    false
                }
                Err(oneshot::error::TryRecvError::Empty) => true,
                Err(oneshot::error::TryRecvError::Closed) => false,
            }
        });

        if fired.is_some() {
            self.receivers.clear();
        }
        fired
    }

    /// Waits until the signal fires.
    ///
    /// Cancel-safe. Once it has returned a reason, later calls pend forever.
    pub async fn fired(&mut self) -> RevocationReason {
        poll_fn(|context| {
            let mut index = 0;
            while index < self.receivers.len() {
                match Pin::new(&mut self.receivers[index]).poll(context) {
                    Poll::Ready(Ok(reason)) => {
                        self.receivers.clear();
                        return Poll::Ready(reason);
                    }
                    Poll::Ready(Err(_)) => {
                        self.receivers.swap_remove(index);
                    }
                    Poll::Pending => index += 1,
                }
            }
            Poll::Pending
        })
        .await
    }
}
