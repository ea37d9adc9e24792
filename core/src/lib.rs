//! Platform-agnostic broker session supervisor
//!
//! This crate keeps a secure pub/sub session alive over an unreliable
//! network. It has NO hardware dependencies: boards plug in a transport, a
//! TLS engine, a protocol engine and a credential store through the traits
//! in `hal-abstractions`.
//!
//! - **`supervisor`**: state machine, retry and backoff policy
//! - **`secure`**: credential loading and bounded TLS handshake
//! - **`session`**: connect/publish/subscribe/poll with loss signaling
//! - **`link`**: `static`-friendly handle shared with application tasks
//! - **`bridge`**: single-slot reconnect signal

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod backoff;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod link;
pub mod pem;
pub mod secure;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod timeout;
pub mod topic;

pub use backoff::{Backoff, BackoffPolicy};
pub use bridge::EventBridge;
pub use channel::{ChannelOf, Metered, ReadMeter, SessionChannel};
pub use config::{ConfigError, RetryPolicy, Subscription, SupervisorConfig, TlsSettings};
pub use error::{Degraded, FailureClass, RequestError, StageError};
pub use link::{Link, PendingRequest};
pub use secure::{SecureChannel, SecureError};
pub use session::{Session, SessionError};
pub use state::{RetryState, SessionState, Transition};
pub use supervisor::Supervisor;
