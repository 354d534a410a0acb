//! Session subsystem: one broker connection, one publish gate, one event loop
//!
//! - [`session`] - statum lifecycle machine and the single-threaded event loop
//! - [`session_handle`] - spawn/publish/observe/teardown API for the UI layer
//!
//! ```text
//! UI ──[SessionCommand]──► CoinDropSession ──[SessionView]──► UI
//!                              ▲
//!                   TransportEvent (mqtt driver)
//! ```

pub mod session;
pub mod session_handle;

pub use session::{CoinDropSession, SessionCommand, SessionView};
pub use session_handle::{SessionError, SessionHandle};
