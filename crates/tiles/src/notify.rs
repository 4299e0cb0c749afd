//! Coalesced frame-ready notification.
//!
//! A single bounded(1) token channel: workers call `notify` as often as they
//! like, the consumer sees at most one outstanding token, and the ticker
//! paces deliveries so callbacks arrive at 30 Hz at most.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReady;

#[derive(Debug, Clone)]
pub struct FrameNotifier {
    sender: Sender<FrameReady>,
}

impl FrameNotifier {
    /// Requests a consumer frame. A token already in flight absorbs the
    /// request; a departed consumer is ignored.
    pub fn notify(&self) {
        match self.sender.try_send(FrameReady) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[derive(Debug)]
pub struct FrameTicker {
    receiver: Receiver<FrameReady>,
    min_interval: Duration,
    last_delivery: Option<Instant>,
}

impl FrameTicker {
    /// Non-blocking poll. Returns `false` without consuming the token while
    /// the previous delivery is younger than the minimum interval, so no
    /// request is ever dropped by pacing.
    pub fn try_take(&mut self) -> bool {
        if let Some(last) = self.last_delivery {
            if last.elapsed() < self.min_interval {
                return false;
            }
        }
        match self.receiver.try_recv() {
            Ok(FrameReady) => {
                self.last_delivery = Some(Instant::now());
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    /// Blocking wait with pacing. Returns `false` on timeout or when every
    /// notifier is gone.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(FrameReady) => {
                if let Some(last) = self.last_delivery {
                    let since = last.elapsed();
                    if since < self.min_interval {
                        std::thread::sleep(self.min_interval - since);
                    }
                }
                self.last_delivery = Some(Instant::now());
                true
            }
            Err(_) => false,
        }
    }
}

pub fn frame_channel(min_interval: Duration) -> (FrameNotifier, FrameTicker) {
    let (sender, receiver) = bounded(1);
    (
        FrameNotifier { sender },
        FrameTicker {
            receiver,
            min_interval,
            last_delivery: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_notifications_coalesces_to_one_token() {
        let (notifier, mut ticker) = frame_channel(Duration::ZERO);
        for _ in 0..10 {
            notifier.notify();
        }
        assert!(ticker.try_take());
        assert!(!ticker.try_take());
    }

    #[test]
    fn pacing_holds_the_token_instead_of_dropping_it() {
        let (notifier, mut ticker) = frame_channel(Duration::from_millis(33));
        notifier.notify();
        assert!(ticker.try_take());

        // Within the interval the token stays queued.
        notifier.notify();
        assert!(!ticker.try_take());

        std::thread::sleep(Duration::from_millis(40));
        assert!(ticker.try_take());
    }

    #[test]
    fn rapid_requests_deliver_at_most_two_callbacks() {
        let (notifier, mut ticker) = frame_channel(Duration::from_millis(33));
        let mut delivered = 0;
        for _ in 0..20 {
            notifier.notify();
            if ticker.try_take() {
                delivered += 1;
            }
        }
        assert!(delivered >= 1 && delivered <= 2, "delivered {delivered}");
    }

    #[test]
    fn wait_times_out_when_nothing_is_pending() {
        let (_notifier, mut ticker) = frame_channel(Duration::ZERO);
        assert!(!ticker.wait_timeout(Duration::from_millis(5)));
    }
}
