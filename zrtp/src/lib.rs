//! ZRTP media-path key agreement.
//!
//! The engine negotiates SRTP keys over an untrusted RTP channel:
//! discovery (Hello), hash-committed Diffie-Hellman with retained-secret
//! continuity across calls, Confirm exchange, and a short
//! authentication string the users compare verbally. Once a stream is
//! Secure, the paired [`zrtp-srtp`](srtp) transformer protects every
//! RTP/RTCP packet in place.
//!
//! The engine is sans-I/O: the host owns sockets, timers, persistent
//! secret storage and event handling, all wired in through the
//! [`engine::Callbacks`] bundle. The crate ships in-process reference
//! implementations of the scheduler ([`sched::ThreadScheduler`]) and the
//! secret cache ([`cache::InMemoryCache`]).

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod cache;
pub mod config;
pub mod crypto;
pub mod engine;
mod error;
pub mod event;
pub mod kdf;
mod machine;
pub mod packet;
pub mod rand_source;
pub mod sched;
pub mod session;
pub mod stream;

pub use config::{EngineConfig, LicenseMode, Profile, SignalingRole};
pub use engine::{Callbacks, PacketSender, ZrtpEngine};
pub use error::{Error, ProtocolError, Result};
pub use event::{EventHandler, ProtocolEvent, SecurityEvent};
pub use session::{Session, SessionInfo};
pub use stream::{State, Stream, StreamInfo, StreamMode};
