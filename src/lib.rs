//! # synctree
//!
//! Discover the reference graph of a remotely hosted document and synchronize every document in
//! it, dependencies first.
//!
//! ## Overview
//!
//! Documents in a shared collaboration service reference each other: an architecture model links
//! a structure model, which links a site model, and so on. Publishing them one at a time is
//! tedious, and publishing a parent before the documents it references leaves collaborators with
//! stale links. synctree walks the graph below one root document, computes a leaf-first order,
//! and runs the same staged open / reload / publish / close pipeline against each document,
//! recording a per-document outcome instead of stopping on the first failure.
//!
//! ### Key Features
//!
//! - **Breadth-first discovery**: every document is scanned at most once; every reference is kept
//! - **Cycle tolerant ordering**: leaf-first post-order that always terminates, with cycle reports
//! - **Failure isolation**: one document failing never stops the rest of the run
//! - **Guaranteed close**: a document opened by a run is closed exactly once
//! - **Event streaming**: progress is sent over a channel so a UI thread can follow along
//!
//! ## Architecture
//!
//! - **[`resource`]**: Document identity (`ResourceKey`) and discovered nodes
//! - **[`host`]**: The `RemoteHost` trait, the only seam to the hosting application
//! - **[`links`]**: Turning raw reference records into resolved child links
//! - **[`discovery`]**: `GraphDiscoverer`, the breadth-first walk
//! - **[`plan`]**: `sync_order`, the leaf-first ordering
//! - **[`pipeline`]**: `SyncExecutor`, the per-document stages
//! - **[`controller`]**: `Controller` and the `WizardState` state machine
//! - **[`config`]**: TOML run configuration
//! - **[`event`]**: Progress events and the event channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashSet;
//! use synctree::{
//!     discovery::discover, host::RemoteHost, pipeline::{StageOptions, SyncExecutor},
//!     plan::sync_order, resource::ResourceKey,
//! };
//!
//! fn run<H: RemoteHost>(host: &H, root: ResourceKey) {
//!     let graph = discover(host, root, "ROOT", None, None);
//!     let order = sync_order(&graph.adjacency, &graph.nodes);
//!     let selection: HashSet<ResourceKey> = order.iter().cloned().collect();
//!
//!     let summary = SyncExecutor::new(host, StageOptions::default(), None)
//!         .execute(order.keys(), &selection, &graph.nodes);
//!     println!("{}", summary.text());
//! }
//! ```
//!
//! ### Driving from a UI thread
//!
//! [`controller::Controller`] runs discovery and sync on worker threads and applies their
//! events to a [`controller::WizardState`]:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use synctree::{
//! #     controller::Controller, host::RemoteHost, pipeline::StageOptions, resource::ResourceKey,
//! # };
//! # fn example<H>(host: Arc<H>, root: ResourceKey) -> Result<(), synctree::SyncTreeError>
//! # where
//! #     H: RemoteHost + Send + Sync + 'static,
//! # {
//! let mut controller = Controller::new(host, StageOptions::default())?;
//! controller.start_discovery(root, "ROOT".to_string())?;
//! controller.wait();
//! controller.start_sync()?;
//! controller.wait();
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! All modules log through `tracing`, prefixed by the component (`[Discovery]`, `[Sync]`,
//! `[Controller]`). Install any subscriber to see them.

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod event;
pub mod host;
pub mod links;
pub mod pipeline;
pub mod plan;
pub mod resource;

pub use error::*;
