//! Publisher confirms.
use std::sync::Mutex;

use amqp_wire::types::AmqpDeliveryTag;
use tokio::{
    sync::watch,
    time::{self, Duration, Instant},
};
use tracing::{debug, warn};

use super::{continuation::Expected, Channel};
use crate::{
    api::{error::Error, Result},
    frame::{Command, Select, SelectOk},
};

#[derive(Debug)]
struct Confirms {
    /// 0 until confirms are enabled, then the sequence number of the next publish.
    next_publish_seq_no: u64,
    /// High-water mark of acked or nacked publishes.
    delivered_items: u64,
    max_delivery_id: u64,
    only_acks_received: bool,
}

/// Confirm counters shared by publishers, waiters and the reader task.
pub(crate) struct ConfirmState {
    state: Mutex<Confirms>,
    /// Bumped on every ack, nack and on shutdown to wake waiters.
    changed: watch::Sender<u64>,
}

impl ConfirmState {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(Confirms {
                next_publish_seq_no: 0,
                delivered_items: 0,
                max_delivery_id: 0,
                only_acks_received: true,
            }),
            changed,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Confirms> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enable(&self) {
        let mut state = self.lock();
        if state.next_publish_seq_no == 0 {
            state.next_publish_seq_no = 1;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().next_publish_seq_no > 0
    }

    pub fn next_publish_seq_no(&self) -> u64 {
        self.lock().next_publish_seq_no
    }

    /// Assign sequence numbers to `count` publishes, if confirms are enabled.
    pub fn allocate(&self, count: u64) {
        let mut state = self.lock();
        if state.next_publish_seq_no > 0 {
            state.next_publish_seq_no += count;
        }
    }

    /// Record one `basic.ack` or `basic.nack` from the broker.
    pub fn handle_ack_nack(&self, delivery_tag: AmqpDeliveryTag, multiple: bool, is_nack: bool) {
        {
            let mut state = self.lock();
            if state.next_publish_seq_no == 0 {
                return;
            }
            state.delivered_items += 1;
            if multiple && state.max_delivery_id < delivery_tag {
                state.max_delivery_id = delivery_tag;
            }
            state.delivered_items = state.delivered_items.max(state.max_delivery_id);
            state.only_acks_received &= !is_nack;
        }
        self.wake_all();
    }

    pub fn wake_all(&self) {
        self.changed.send_modify(|generation| *generation += 1);
    }

    /// `Some(only_acks_received)` once every publish was acked or nacked.
    /// Reading a drained state resets the flag.
    fn take_if_drained(&self) -> Option<bool> {
        let mut state = self.lock();
        if state.next_publish_seq_no > 0 && state.delivered_items == state.next_publish_seq_no - 1 {
            Some(std::mem::replace(&mut state.only_acks_received, true))
        } else {
            None
        }
    }

    fn only_acks_received(&self) -> bool {
        self.lock().only_acks_received
    }

    #[cfg(test)]
    pub fn delivered_items(&self) -> u64 {
        self.lock().delivered_items
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmSelectArguments {
    pub no_wait: bool,
}

impl ConfirmSelectArguments {
    pub fn new(no_wait: bool) -> Self {
        Self { no_wait }
    }
}

/// Result of waiting for confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOutcome {
    /// No nack was received since the previous complete wait.
    pub only_acks_received: bool,
    pub timed_out: bool,
}

impl Channel {
    /// Put the channel in confirm mode. Publishes are numbered from 1.
    ///
    /// See [confirm.select](https://www.rabbitmq.com/amqp-0-9-1-reference.html#confirm.select).
    pub async fn confirm_select(&self, args: ConfirmSelectArguments) -> Result<()> {
        self.inner.confirms.enable();
        let select = Command::new(
            Select {
                no_wait: args.no_wait,
            }
            .into_frame(),
        );
        if args.no_wait {
            self.send(select).await
        } else {
            self.call(select, Expected::Reply(SelectOk::header()), None)
                .await
                .map(|_| ())
        }
    }

    /// Sequence number the next publish gets, 0 if confirms are not enabled.
    pub fn next_publish_seq_no(&self) -> u64 {
        self.inner.confirms.next_publish_seq_no()
    }

    /// Wait until every publish so far was acked or nacked, or `timeout` elapsed.
    ///
    /// `timeout` is an overall deadline. A complete wait resets
    /// `only_acks_received` for the next one.
    pub async fn wait_for_confirms(&self, timeout: Duration) -> Result<ConfirmOutcome> {
        let confirms = &self.inner.confirms;
        if !confirms.is_enabled() {
            return Err(Error::InvalidOperation(
                "confirms not enabled on this channel".to_owned(),
            ));
        }
        let deadline = Instant::now() + timeout;
        let mut changed = confirms.changed.subscribe();
        loop {
            self.ensure_open()?;
            if let Some(only_acks_received) = confirms.take_if_drained() {
                return Ok(ConfirmOutcome {
                    only_acks_received,
                    timed_out: false,
                });
            }
            match time::timeout_at(deadline, changed.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(self.closed_error()),
                Err(_) => {
                    debug!("wait for confirms on channel {} timed out", self);
                    return Ok(ConfirmOutcome {
                        only_acks_received: confirms.only_acks_received(),
                        timed_out: true,
                    });
                }
            }
        }
    }

    /// Like [`wait_for_confirms`](Channel::wait_for_confirms), but a nack or a
    /// timeout closes the channel and fails with `ConfirmFailure`.
    pub async fn wait_for_confirms_or_die(&self, timeout: Duration) -> Result<()> {
        let outcome = self.wait_for_confirms(timeout).await?;
        let failure = if !outcome.only_acks_received {
            "Nacks Received"
        } else if outcome.timed_out {
            "Timed out waiting for acks"
        } else {
            return Ok(());
        };
        warn!("channel {}: {}, closing", self, failure);
        if let Err(err) = self
            .close_with(amqp_wire::constants::REPLY_SUCCESS, failure)
            .await
        {
            debug!("close after confirm failure: {}", err);
        }
        Err(Error::ConfirmFailure(failure.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::ConfirmState;

    fn publish(state: &ConfirmState, count: u64) {
        state.allocate(count);
    }

    #[test]
    fn test_multiple_ack_jumps_high_water_mark() {
        let state = ConfirmState::new();
        state.enable();
        publish(&state, 3);
        assert_eq!(4, state.next_publish_seq_no());

        state.handle_ack_nack(2, true, false);
        assert_eq!(2, state.delivered_items());
        assert_eq!(None, state.take_if_drained());

        state.handle_ack_nack(3, false, false);
        assert_eq!(3, state.delivered_items());
        assert_eq!(Some(true), state.take_if_drained());
    }

    #[test]
    fn test_nack_is_reported_once() {
        let state = ConfirmState::new();
        state.enable();
        publish(&state, 2);
        state.handle_ack_nack(1, false, true);
        state.handle_ack_nack(2, false, false);
        assert_eq!(Some(false), state.take_if_drained());
        // reset after a complete wait
        assert_eq!(Some(true), state.take_if_drained());
    }

    #[test]
    fn test_high_water_mark_never_decreases() {
        let state = ConfirmState::new();
        state.enable();
        publish(&state, 10);
        let mut last = 0;
        for (tag, multiple) in [(3, true), (4, false), (8, true), (9, false), (10, false)] {
            state.handle_ack_nack(tag, multiple, false);
            assert!(state.delivered_items() >= last);
            last = state.delivered_items();
        }
        assert_eq!(10, last);
        assert_eq!(Some(true), state.take_if_drained());
    }

    #[test]
    fn test_acks_ignored_without_confirms() {
        let state = ConfirmState::new();
        state.handle_ack_nack(1, false, true);
        assert_eq!(0, state.delivered_items());
        assert!(!state.is_enabled());
    }
}
