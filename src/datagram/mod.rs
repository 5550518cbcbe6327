//! Datagram side of a relay
//!
//! A `DatagramBinding` owns one UDP socket from bind to close. Its events are
//! exposed as typed channels rather than a string-keyed emitter:
//!
//! ```text
//!   ready    watch<Option<SocketAddr>>   set once the OS confirmed the bind
//!   message  broadcast<Datagram>         one item per received datagram
//!   close    watch<bool>                 flips to true exactly once
//!   error    broadcast<Arc<io::Error>>   receive-side transport errors
//! ```
//!
//! The multicast group (if configured) is joined only after `ready` fired.

pub mod binding;
pub mod event;
mod socket;

pub use binding::DatagramBinding;
pub use event::{Datagram, RemoteInfo, CLOSE_EVENT, ERROR_EVENT, LISTENING_EVENT, MESSAGE_EVENT};
