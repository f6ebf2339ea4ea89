//! Row changes published by the primary store.
//!
//! Triggers on the primary store's tables `NOTIFY` a channel with one JSON
//! payload per changed row. The listener drains the channel and the ingest
//! turns each change into a save or delete signal on the [`SignalBus`], so
//! the default receivers schedule the matching syncs.
//!
//! [`SignalBus`]: crate::signals::SignalBus

mod events;
mod ingest;
mod listener;

pub use events::{parse_payloads, ChangeEvent, ChangeOp};
pub use ingest::ChangeIngest;
pub use listener::{PgChangeListener, DEFAULT_CHANGE_CHANNEL};
