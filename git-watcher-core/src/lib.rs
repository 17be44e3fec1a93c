#![doc = "git-watcher-core: repository synchronisation and artifact publication engine."]

//! Everything that touches a working copy lives here: the git command seam,
//! credential provisioning, branch synchronisation, submodule coordination,
//! auto-commit and the artifact publication workflow. The binary crate adds
//! scheduling, HTTP and notification delivery on top.
//!
//! # Usage
//! Build a [`manager::Manager`] once from [`config::GitSettings`] and share
//! it behind an `Arc`.

pub mod artifacts;
pub mod autocommit;
pub mod command;
pub mod config;
pub mod contract;
pub mod credentials;
pub mod error;
pub mod locks;
pub mod manager;
pub mod publish;
pub mod repository;
pub mod submodules;
pub mod synchronise;

pub use error::{Result, WatcherError};
pub use manager::{BranchReport, Manager};
pub use publish::PublishOutcome;
