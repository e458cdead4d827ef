//! Sync engine for a link-in-bio profile editor.
//!
//! The UI edits one in-memory [`ProfileDraft`] through an [`EditSession`];
//! the session debounces writes per field, recovers expired tokens once, and
//! persists drag reorders as a single batch with rollback.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod normalize;
pub mod reorder;
pub mod session;
pub mod state;
pub mod storage;
pub mod sync;
mod util;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError, ApiErrorKind, HttpTransport, Transport};
pub use auth::{AuthRetryWrapper, Credentials, Session};
pub use config::EditorConfig;
pub use models::{EntityId, Link, LinkKind, ProfileDraft, SocialIcon};
pub use normalize::{normalize, NormalizedLink, ValidationError};
pub use reorder::{ReorderCoordinator, ReorderEntry, ReorderError};
pub use session::{DraftObserver, EditSession, FieldKey, FieldName, FieldState, SessionError};
pub use state::EditorSignals;
#[cfg(target_arch = "wasm32")]
pub use state::open_editor;
