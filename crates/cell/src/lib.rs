//! Single-slot broadcast primitives.
//!
//! A [`Cell`] holds the latest known value (or none) and fans every new value
//! out to its subscribers. Subscribers that attach after a value exists
//! receive it immediately. [`CellRegistry`] maps keys to cells, creating each
//! cell on first access so every caller asking for the same key shares one
//! cell.

mod cell;
mod receiver;
mod registry;

pub use cell::{Cell, Subscription};
pub use receiver::CellReceiver;
pub use registry::CellRegistry;
