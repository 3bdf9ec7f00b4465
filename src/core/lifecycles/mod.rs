//! # Per-unit lifecycle steps.
//!
//! Each step is a free async function over an owned [`Runtime`] handle and an
//! `Arc<Unit>`, so it can be boxed, shared, or spawned without borrowing.
//!
//! | step        | starts from                      | success        | failure            |
//! |-------------|----------------------------------|----------------|--------------------|
//! | `load`      | not-loaded, load-error           | not-bootstrapped | load-error / broken |
//! | `bootstrap` | not-bootstrapped                 | not-mounted    | broken             |
//! | `mount`     | not-mounted                      | mounted        | broken (after cleanup unmount) |
//! | `unmount`   | mounted                          | not-mounted    | broken             |
//! | `unload`    | not-mounted, not-bootstrapped, load-error | not-loaded | broken        |
//! | `update`    | mounted (parcels only)           | mounted        | broken             |
//!
//! Steps called in any other status resolve without doing anything.
//!
//! [`Runtime`]: crate::Runtime

mod bootstrap;
mod load;
mod mount;
mod unload;
mod unmount;
mod update;

pub(crate) use bootstrap::bootstrap;
pub(crate) use load::load;
pub(crate) use mount::mount;
pub(crate) use unload::{UnloadSlot, request_unload, unload};
pub(crate) use unmount::unmount;
pub(crate) use update::update;

pub use unload::{UnloadHandle, UnloadOptions};
