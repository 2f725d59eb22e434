//! Multi-subscriber channels with scope-bound subscriptions.
//!
//! A channel is a recipe pair: the [`Port`] sends and closes, the
//! [`Stream`] mints fresh [`Subscription`]s. Each subscription owns a
//! private queue filled only with values sent after it was created; the
//! subscription itself is a resource, so it is registered for exactly as
//! long as the subscribing scope lives and deregistered on its teardown.

use crate::channel::queue::{PollOutcome, SubscriberQueue};
use crate::error::{Error, ErrorKind};
use crate::op::primitive::suspend_with;
use crate::op::{ensure, resource, Operation};
use crate::tracing_compat::warn;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// One step of consuming a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next<T, C> {
    /// A value sent while this subscription was live.
    Item(T),
    /// The channel's terminal value; repeated on every further read.
    Done(C),
}

impl<T, C> Next<T, C> {
    /// Returns the item, if this is one.
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::Done(_) => None,
        }
    }
}

struct ChannelState<T, C> {
    subscribers: Vec<(u64, Rc<RefCell<SubscriberQueue<T, C>>>)>,
    closed: Option<C>,
    capacity: Option<usize>,
    next_id: u64,
}

/// Creates a channel with unbounded per-subscriber queues.
///
/// Every live subscriber observes every subsequent send exactly once, in
/// send order; no subscriber observes values sent before it existed.
#[must_use]
pub fn create_channel<T: Clone + 'static, C: Clone + 'static>() -> (Port<T, C>, Stream<T, C>) {
    channel_with(None)
}

/// Creates a channel whose per-subscriber queues hold at most `capacity`
/// unconsumed items; a send into a full queue sheds that queue's oldest
/// item (and logs the shed).
#[must_use]
pub fn create_channel_with_capacity<T: Clone + 'static, C: Clone + 'static>(
    capacity: usize,
) -> (Port<T, C>, Stream<T, C>) {
    channel_with(Some(capacity))
}

fn channel_with<T: Clone + 'static, C: Clone + 'static>(
    capacity: Option<usize>,
) -> (Port<T, C>, Stream<T, C>) {
    let state = Rc::new(RefCell::new(ChannelState {
        subscribers: Vec::new(),
        closed: None,
        capacity,
        next_id: 1,
    }));
    (
        Port {
            state: Rc::clone(&state),
        },
        Stream { state },
    )
}

/// The sending half of a channel.
pub struct Port<T, C> {
    state: Rc<RefCell<ChannelState<T, C>>>,
}

impl<T, C> Clone for Port<T, C> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static, C: Clone + 'static> Port<T, C> {
    /// Sends `value` to every live subscription. A no-op once the
    /// channel is closed.
    pub fn send(&self, value: T) -> Operation<()> {
        let state = Rc::clone(&self.state);
        Operation::from_fn(move || {
            let mut wakes = VecDeque::new();
            let mut shed_count = 0_u32;
            {
                let st = state.borrow();
                if st.closed.is_some() {
                    return;
                }
                for (_, queue) in &st.subscribers {
                    let (wake, shed) = queue.borrow_mut().offer(value.clone());
                    if let Some(wake) = wake {
                        wakes.push_back(wake);
                    }
                    if shed {
                        shed_count += 1;
                    }
                }
            }
            if shed_count > 0 {
                warn!(count = shed_count, "bounded subscriber queues shed items");
            }
            for (resume, next) in wakes {
                resume.resume(Box::new(next));
            }
        })
    }

    /// Closes the channel with a terminal value. Every subscription
    /// observes it exactly once after draining its queue, then forever
    /// after; later sends and closes are no-ops.
    pub fn close(&self, value: C) -> Operation<()> {
        let state = Rc::clone(&self.state);
        Operation::from_fn(move || {
            let mut wakes = VecDeque::new();
            {
                let mut st = state.borrow_mut();
                if st.closed.is_some() {
                    return;
                }
                st.closed = Some(value.clone());
                for (_, queue) in &st.subscribers {
                    if let Some(wake) = queue.borrow_mut().close(value.clone()) {
                        wakes.push_back(wake);
                    }
                }
            }
            for (resume, next) in wakes {
                resume.resume(Box::new(next));
            }
        })
    }
}

impl<T, C> std::fmt::Debug for Port<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("subscribers", &self.state.borrow().subscribers.len())
            .finish_non_exhaustive()
    }
}

/// The subscription recipe: each run registers a fresh subscription for
/// the lifetime of the subscribing scope.
pub struct Stream<T, C> {
    state: Rc<RefCell<ChannelState<T, C>>>,
}

impl<T, C> Clone for Stream<T, C> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static, C: Clone + 'static> Stream<T, C> {
    /// Registers a new subscription, bound to the current scope.
    ///
    /// The subscription observes values sent from this point on; it is
    /// deregistered (and its queue discarded) when the scope ends.
    pub fn subscribe(&self) -> Operation<Subscription<T, C>> {
        let state = Rc::clone(&self.state);
        resource(move |provider| {
            let register_state = Rc::clone(&state);
            let cleanup_state = Rc::clone(&state);
            Operation::from_fn(move || {
                let mut st = register_state.borrow_mut();
                let id = st.next_id;
                st.next_id += 1;
                let queue = Rc::new(RefCell::new(SubscriberQueue::new(
                    st.capacity,
                    st.closed.clone(),
                )));
                st.subscribers.push((id, Rc::clone(&queue)));
                Subscription { id, queue }
            })
            .then(move |subscription| {
                let state = Rc::clone(&cleanup_state);
                let id = subscription.id;
                let provider = provider.clone();
                ensure(move || {
                    state
                        .borrow_mut()
                        .subscribers
                        .retain(|(sid, _)| *sid != id);
                })
                .then(move |()| provider.provide(subscription.clone()))
            })
        })
    }
}

impl<T, C> std::fmt::Debug for Stream<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

/// A stateful consumer of one channel subscription.
pub struct Subscription<T, C> {
    id: u64,
    queue: Rc<RefCell<SubscriberQueue<T, C>>>,
}

impl<T, C> Clone for Subscription<T, C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            queue: Rc::clone(&self.queue),
        }
    }
}

impl<T: Clone + 'static, C: Clone + 'static> Subscription<T, C> {
    /// Takes the next step: an item, or the terminal value once closed.
    /// Parks until a send or close arrives when the queue is empty.
    ///
    /// A subscription has one consumer: a second `next` while one is
    /// parked fails with [`ErrorKind::SubscriptionBusy`].
    pub fn next(&self) -> Operation<Next<T, C>> {
        let queue = Rc::clone(&self.queue);
        suspend_with(move |resume| {
            let outcome = queue.borrow_mut().poll(resume);
            match outcome {
                PollOutcome::Deliver(resume, next) => resume.resume(Box::new(next)),
                PollOutcome::Parked => {}
                PollOutcome::Busy(resume) => resume.fail(
                    Error::new(ErrorKind::SubscriptionBusy)
                        .with_context("subscription already has a parked consumer"),
                ),
            }
        })
    }
}

impl<T, C> std::fmt::Debug for Subscription<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("dropped", &self.queue.borrow().dropped)
            .finish()
    }
}
