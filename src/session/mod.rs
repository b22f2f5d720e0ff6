//! Session management
//!
//! This module provides `Session` for one conversation's state, its
//! metadata, and the on-disk storage for transcripts.
//!
//! Each session has a unique session_id. Subagent sessions are linked to
//! their parent through a weak reference and the parent's id in metadata.

pub mod metadata;
pub mod session;
pub mod storage;

pub use metadata::SessionMetadata;
pub use session::Session;
pub use storage::SessionStorage;
