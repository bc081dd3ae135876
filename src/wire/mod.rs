//! Minimal client for the counter store's line-oriented protocol.
//!
//! Only the handful of commands the rate limiter needs are modelled: AUTH,
//! SELECT, GET, INCR and EXPIRE. One [`Connection`] carries one command at a
//! time; there is no pooling or pipelining.

mod command;
mod connection;
mod error;
mod reply;

pub use command::{is_inline_arg, Command, CRLF};
pub use connection::{AuthState, ConnectOptions, Connection};
pub use error::{CommandError, ConnectError};
pub use reply::{Reply, ReplyDecoder, MAX_FRAME_SIZE};
