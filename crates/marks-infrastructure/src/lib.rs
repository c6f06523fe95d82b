//! Infrastructure adapters for MARKS.
//!
//! Concrete implementations of the traits declared in `marks-core`: the REST
//! gateway, identity provider and change feed for the remote project, the
//! in-memory remote, and file-backed config/session storage.

pub mod memory_remote;
pub mod paths;
pub mod realtime_change_feed;
pub mod rest_bookmark_gateway;
pub mod rest_client;
pub mod rest_identity_provider;
pub mod storage;

pub use crate::memory_remote::{InMemoryIdentityProvider, InMemoryRemote, RemoteCall, RemoteOp};
pub use crate::paths::MarksPaths;
pub use crate::realtime_change_feed::RealtimeChangeFeed;
pub use crate::rest_bookmark_gateway::RestBookmarkGateway;
pub use crate::rest_identity_provider::RestIdentityProvider;
pub use crate::storage::{ConfigStorage, FileSessionStorage};
