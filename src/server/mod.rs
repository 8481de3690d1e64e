//! The session-lifecycle core of the server.
//!
//! The request router correlates each HTTP message with a session in the
//! [`SessionStore`]; each session owns one [`SessionTransport`] which executes
//! messages against the shared [`DispatchTable`]. The [`Reaper`] and the
//! [`ShutdownCoordinator`] act on the store out-of-band.

mod dispatch;
mod reaper;
mod router;
mod shutdown;
mod store;
mod transport;

pub use dispatch::{DispatchTable, PromptArguments, RequestHandler, ResourceRequest};
pub use reaper::Reaper;
pub use router::{router, AppState, HttpError, SESSION_ID_HEADER};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownReason};
pub use store::{AddOutcome, Session, SessionId, SessionStore};
pub use transport::{ConnectionHandle, SessionTransport};
