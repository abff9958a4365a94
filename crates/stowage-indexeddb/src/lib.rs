//! IndexedDB storage backend for Stowage (browser WASM)
//!
//! This crate implements the `stowage-core` storage traits over the browser's
//! IndexedDB, so an `Engine` built on it persists models across page loads.
//! Object stores, key paths, auto-increment keys and unique or multi-entry
//! indexes map one to one onto their IndexedDB counterparts.
//!
//! Every request settles through a `js_sys::Promise` awaited with
//! `wasm_bindgen_futures::JsFuture`. Awaiting only storage requests inside a
//! transaction keeps it alive; awaiting anything else lets IndexedDB commit
//! it early.
//!
//! The crate is empty on non-WASM targets.
//!
//! # Example
//!
//! ```rust,ignore
//! use stowage_core::{fields, Attribute, Engine, EngineConfig, StoreOptions};
//! use stowage_indexeddb::IndexedDbBackend;
//!
//! let engine = Engine::new(IndexedDbBackend::new(), EngineConfig::new("app"));
//! let users = engine.define(
//!     "users",
//!     vec![("name", Attribute::string().not_null())],
//!     StoreOptions::default(),
//! )?;
//!
//! // the database opens and migrates on first use
//! let alice = users.create(fields! { "name" => "Alice" }).await?;
//! assert!(alice.primary_key().is_some());
//! ```

#[cfg(target_arch = "wasm32")]
mod backend;
#[cfg(target_arch = "wasm32")]
pub mod convert;
#[cfg(target_arch = "wasm32")]
pub mod error;
#[cfg(target_arch = "wasm32")]
pub mod idb;

#[cfg(target_arch = "wasm32")]
pub use backend::{IdbConnection, IndexedDbBackend};
