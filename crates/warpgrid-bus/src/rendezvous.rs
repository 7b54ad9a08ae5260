//! Unbuffered hand-off between one producer and its consumers.
//!
//! A [`Puller`] announces that it is waiting by posting a [`Slot`] on the
//! demand queue. [`Pusher::push`] offers its value in the first live slot
//! and completes only once the puller has taken it. Nothing is stored
//! between the two sides, so a producer blocks until a consumer is actually
//! waiting.
//!
//! Both sides may abandon a hand-off at any point, and the value ends up on
//! exactly one side:
//!
//! - a puller that stops waiting after a value was offered hands it back,
//!   and the pusher offers it to the next slot;
//! - a pusher that gives up withdraws its offer unless the puller already
//!   took it, in which case the push counts as delivered.
//!
//! Dropping the pusher ends the sequence: every waiting or future pull
//! yields `None`. Dropping every puller makes pushes fail at once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

pub(crate) fn channel<T>() -> (Pusher<T>, Puller<T>) {
    let (demand_tx, demand_rx) = mpsc::unbounded_channel();
    (Pusher { demand: demand_rx }, Puller { demand: demand_tx })
}

/// Why a push did not deliver its value.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushError<T, R> {
    /// Every puller is gone; the value is returned.
    Disconnected(T),
    /// The give-up future resolved before a puller took the value.
    GaveUp(R),
}

enum SlotState<T> {
    /// The puller is waiting and nothing has been offered yet.
    Open,
    Offered(T),
    Taken,
    /// The pusher withdrew its offer. The puller has to ask again.
    Withdrawn,
    /// The puller stopped waiting and handed back an offered value.
    Returned(T),
    /// The puller stopped waiting. The slot is dead.
    Abandoned,
}

/// One outstanding demand of a puller.
struct Slot<T> {
    state: Mutex<SlotState<T>>,
    /// Signals the puller: offered or withdrawn.
    offered: Notify,
    /// Signals the pusher: taken or returned.
    settled: Notify,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Open),
            offered: Notify::new(),
            settled: Notify::new(),
        }
    }

    /// Place `value` in an open slot. A dead slot returns it.
    fn offer(&self, value: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Open) {
            return Err(value);
        }
        *state = SlotState::Offered(value);
        drop(state);
        self.offered.notify_one();
        Ok(())
    }
}

enum Pickup<T> {
    Value(T),
    Withdrawn,
    Pending,
    /// The pusher is gone.
    Closed,
}

pub(crate) struct Pusher<T> {
    demand: mpsc::UnboundedReceiver<Arc<Slot<T>>>,
}

impl<T> Pusher<T> {
    /// Hand `value` to a waiting puller, or give up once `give_up` resolves.
    ///
    /// `Ok` means a puller holds the value. Slots of pullers that stopped
    /// waiting are skipped, and a value handed back is offered again.
    pub(crate) async fn push<R>(
        &mut self,
        mut value: T,
        give_up: impl Future<Output = R>,
    ) -> Result<(), PushError<T, R>> {
        tokio::pin!(give_up);
        loop {
            let slot = tokio::select! {
                biased;
                slot = self.demand.recv() => match slot {
                    Some(slot) => slot,
                    None => return Err(PushError::Disconnected(value)),
                },
                reason = &mut give_up => return Err(PushError::GaveUp(reason)),
            };
            if let Err(refused) = slot.offer(value) {
                value = refused;
                continue;
            }

            let mut offer = Offer {
                slot: &slot,
                settled: false,
            };
            tokio::select! {
                biased;
                returned = offer.settle() => match returned {
                    None => return Ok(()),
                    Some(returned) => value = returned,
                },
                reason = &mut give_up => {
                    return match offer.withdraw() {
                        None => Ok(()),
                        Some(_) => Err(PushError::GaveUp(reason)),
                    };
                }
            }
        }
    }
}

impl<T> fmt::Debug for Pusher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pusher").finish_non_exhaustive()
    }
}

/// A value offered into a slot and not yet settled.
///
/// Dropped unsettled, it withdraws the offer.
struct Offer<'a, T> {
    slot: &'a Slot<T>,
    settled: bool,
}

impl<T> Offer<'_, T> {
    /// Wait for the puller. `None` once it took the value, `Some` with the
    /// value if it handed it back.
    async fn settle(&mut self) -> Option<T> {
        loop {
            {
                let mut state = self.slot.state.lock();
                match std::mem::replace(&mut *state, SlotState::Abandoned) {
                    SlotState::Taken => {
                        *state = SlotState::Taken;
                        self.settled = true;
                        return None;
                    }
                    SlotState::Returned(value) => {
                        self.settled = true;
                        return Some(value);
                    }
                    other => *state = other,
                }
            }
            self.slot.settled.notified().await;
        }
    }

    /// Take the offer back. `None` if the puller already took it.
    fn withdraw(&mut self) -> Option<T> {
        self.settled = true;
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Withdrawn) {
            SlotState::Offered(value) => {
                drop(state);
                self.slot.offered.notify_one();
                Some(value)
            }
            SlotState::Returned(value) => {
                *state = SlotState::Abandoned;
                Some(value)
            }
            other => {
                *state = other;
                None
            }
        }
    }
}

impl<T> Drop for Offer<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.withdraw();
        }
    }
}

pub(crate) struct Puller<T> {
    demand: mpsc::UnboundedSender<Arc<Slot<T>>>,
}

impl<T> Puller<T> {
    /// Wait for the next value. `None` once the pusher is gone.
    ///
    /// Cancel-safe: dropping the future before it completes hands any
    /// offered value back to the pusher.
    pub(crate) async fn pull(&self) -> Option<T> {
        loop {
            let slot = Arc::new(Slot::new());
            self.demand.send(slot.clone()).ok()?;
            let mut demand = Demand {
                slot: &slot,
                done: false,
            };
            match demand.wait(&self.demand).await {
                Pickup::Value(value) => return Some(value),
                Pickup::Withdrawn => continue,
                Pickup::Pending | Pickup::Closed => return None,
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.demand.is_closed()
    }
}

impl<T> fmt::Debug for Puller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Puller")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A posted slot the puller is waiting on.
///
/// Dropped before completion, it hands an offered value back.
struct Demand<'a, T> {
    slot: &'a Slot<T>,
    done: bool,
}

impl<T> Demand<'_, T> {
    /// Wait until a value is offered or withdrawn, or the pusher is gone.
    async fn wait(&mut self, queue: &mpsc::UnboundedSender<Arc<Slot<T>>>) -> Pickup<T> {
        loop {
            match self.pick_up() {
                Pickup::Pending => {}
                done => {
                    self.done = true;
                    return done;
                }
            }
            tokio::select! {
                _ = self.slot.offered.notified() => {}
                _ = queue.closed() => {
                    // A pusher withdraws its offer before it is dropped.
                    let last = self.pick_up();
                    self.done = true;
                    return match last {
                        Pickup::Value(value) => Pickup::Value(value),
                        _ => Pickup::Closed,
                    };
                }
            }
        }
    }

    fn pick_up(&self) -> Pickup<T> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Offered(value) => {
                drop(state);
                self.slot.settled.notify_one();
                Pickup::Value(value)
            }
            SlotState::Withdrawn => {
                *state = SlotState::Abandoned;
                Pickup::Withdrawn
            }
            other => {
                *state = other;
                Pickup::Pending
            }
        }
    }
}

impl<T> Drop for Demand<'_, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Abandoned) {
            SlotState::Offered(value) => {
                *state = SlotState::Returned(value);
                drop(state);
                self.slot.settled.notify_one();
            }
            SlotState::Taken => *state = SlotState::Taken,
            _ => {}
        }
    }
}
