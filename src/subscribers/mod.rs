//! # Event subscribers for the mountvisor runtime.
//!
//! ## Architecture
//! ```text
//! Runtime::publish(Event)
//!     ├──► SubscriberSet::emit(&Event)   (inline, ordered, may cancel a cycle)
//!     │        ├──► LogWriter
//!     │        └──► custom subscribers
//!     └──► Bus::publish(Event)           (broadcast, async receivers)
//! ```

mod embedded;
mod set;
mod subscribe;

pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
