//! Core types for chatstream.
//!
//! This crate provides the types shared by the transport, auth, and streaming
//! layers:
//!
//! - **Identifiers**: `UserId` and `SessionId` newtypes
//! - **Requests**: the `ChatRequest` body posted to the streaming endpoint
//! - **Events**: `ChatEvent`, the variant form of one dispatched stream event
//! - **Error envelopes**: `ApiErrorBody`, the JSON error shape the backend returns
//!
//! # Example
//!
//! ```
//! use chatstream_core::{ChatRequest, SessionId, UserId};
//!
//! let user_id: UserId = "user-42".parse().unwrap();
//! let request = ChatRequest::new(user_id, "Which shoes fit wide feet?")
//!     .with_session(SessionId::new("s-1").unwrap());
//!
//! assert!(request.save_history);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api_error;
pub mod error;
pub mod event;
pub mod ids;
pub mod request;

pub use api_error::ApiErrorBody;
pub use error::{CoreError, Result};
pub use event::{ChatEvent, QuickReply};
pub use ids::{IdError, SessionId, UserId};
pub use request::ChatRequest;
