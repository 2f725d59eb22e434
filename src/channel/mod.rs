//! Multi-subscriber value distribution: channels, subscriptions, signals.

#[allow(clippy::module_inception)]
mod channel;
mod queue;
mod signal;

pub use channel::{
    create_channel, create_channel_with_capacity, Next, Port, Stream, Subscription,
};
pub use signal::{create_signal, Signal};
