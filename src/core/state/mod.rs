// src/core/state/mod.rs

//! The State Store: persisted map of sync configs and repo records, behind
//! two interchangeable backends (local file, remote KV table) unified by
//! [`store::StateStore`].

pub mod cache;
pub mod local;
pub mod remote;
pub mod store;

pub use store::{RuntimeView, StateStore};
