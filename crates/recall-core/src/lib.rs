//! # Recall Core
//!
//! Runtime-agnostic logic for Recall: the data model, the shared session
//! store abstraction and its change fan-out, the retry client, the link
//! rotation engine, the optimistic command engine, and the cross-context
//! message bus.
//!
//! This crate contains no sqlx, HTTP client, or filesystem I/O. Storage and
//! network access are reached through the [`store::SessionStore`] and
//! [`backend::Backend`] traits; the `recall` crate supplies the native
//! implementations.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Items, pools, visited sets, interaction status, comments |
//! | [`error`] | The shared [`RecallError`] taxonomy |
//! | [`store`] | `SessionStore` trait, change fan-out, in-memory store, persisted keys |
//! | [`retry`] | Bounded-retry and single-shot-with-timeout request wrappers |
//! | [`backend`] | Remote backend contract |
//! | [`rotation`] | Next-unvisited-link selection with pagination |
//! | [`optimistic`] | Generic optimistic mutate → dispatch → reconcile/rollback engine |
//! | [`resources`] | Toggle and comment strategies for the optimistic engine |
//! | [`interactions`] | Like, bookmark, comment-like and comment commands |
//! | [`bus`] | Request/response message bus between UI contexts and the background |

pub mod backend;
pub mod bus;
pub mod error;
pub mod interactions;
pub mod models;
pub mod optimistic;
pub mod resources;
pub mod retry;
pub mod rotation;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{RecallError, Result};
