//! `repolish_core` keeps generated project files in sync with provider
//! templates while preserving the local customizations of each repository.
//!
//! Templates carry default content plus preservation directives. On every
//! run the template is rendered, the directives are extracted, and values
//! recovered from the file already on disk are written back into the fresh
//! output.
//!
//! ## Processing Pipeline
//!
//! ```text
//! repolish.yaml + provider directories
//!   → Context merge (seed → providers → seed overlay → overrides)
//!   → Render (minijinja)
//!   → Pattern extraction (anchor / regex / multiregex directives)
//!   → Reconcile against the existing file
//!   → Diff / check, or write
//! ```
//!
//! ## Directives
//!
//! ```text
//! ## repolish-start[readme-intro]
//! Default introduction.
//! ## repolish-end[readme-intro]
//!
//! ## repolish-regex[version]: ^version = "(.+?)"$
//! version = "0.1.0"
//!
//! ## repolish-multiregex-block[tools]: ^\[tools\]\n(.*?)(?:^\[|\z)
//! ## repolish-multiregex[tools]: ^(\w+) = "(.*)"$
//! [tools]
//! python = "3.11"
//! uv = "0.4"
//! ```
//!
//! Marker lines may carry any comment prefix and never appear in the output.
//!
//! ## Modules
//!
//! - [`config`]: Loading `repolish.yaml`.
//! - [`context`]: Merging the project seed, provider contributions and overrides.
//! - [`diff`]: Line-ending aware comparison and unified diffs.
//! - [`overrides`]: Dot-path overrides applied to the context tree.
//! - [`parser`]: Extracting directives from rendered template text.
//! - [`project`]: Walking provider templates, planning, checking and writing.
//! - [`provider`]: The [`Provider`] trait and directory-backed providers.
//! - [`reconciler`]: Applying directives against existing content.
//! - [`render`]: Rendering through [`minijinja`](https://docs.rs/minijinja).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use repolish_core::{check_plan, compute_plan, load_project, write_plan};
//! use std::path::Path;
//!
//! let ctx = load_project(Path::new("."), None).unwrap();
//! let plan = compute_plan(&ctx).unwrap();
//!
//! let report = check_plan(&ctx, &plan).unwrap();
//! if report.has_changes() {
//!     write_plan(&ctx, &plan).unwrap();
//! }
//! ```

pub use config::*;
pub use context::*;
pub use diff::*;
pub use error::*;
pub use overrides::*;
pub use parser::*;
pub use project::*;
pub use provider::*;
pub use reconciler::*;
pub use render::*;

pub mod config;
pub mod context;
pub mod diff;
#[allow(unused_assignments)]
mod error;
pub(crate) mod lexer;
pub mod overrides;
pub mod parser;
pub mod project;
pub mod provider;
pub mod reconciler;
pub mod render;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
