//! # Recall
//!
//! Native host for the Recall content-discovery extension: durable session
//! storage, the HTTP backend client, the background message handlers, an
//! HTTP bridge for out-of-process UI contexts, and the `recall` CLI.
//!
//! The engines themselves live in [`recall_core`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  POST /messages  ┌────────────┐   ┌─────────────┐
//! │ UI contexts │─────────────────▶│ Background │──▶│   Backend   │
//! │ overlay/    │◀─────────────────│  handlers  │   │   (HTTP)    │
//! │ panel/popup │  GET /changes    └─────┬──────┘   └─────────────┘
//! └─────────────┘        ▲               ▼
//!                        │        ┌────────────┐
//!                        └────────│  SQLite kv │
//!                                 └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recall init                   # create database
//! recall login <token>          # store the auth token
//! recall next                   # rotate to the next unvisited link
//! recall like <link-id>         # optimistic like toggle
//! recall serve                  # start the background + HTTP bridge
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite-backed session store |
//! | [`http_backend`] | `reqwest` backend client |
//! | [`background`] | Message handlers over the core engines |
//! | [`server`] | HTTP bridge |

pub mod background;
pub mod config;
pub mod db;
pub mod http_backend;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
