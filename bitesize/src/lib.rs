//! Core reconciliation engine for the environment operator.
//!
//! The operator keeps a Kubernetes namespace aligned with a declarative
//! environment manifest held in a Git repository. Each reconcile tick pulls
//! the repository, loads the manifest into the [`model`] types, reads the
//! live cluster back into the same shape through [`cluster`], decides which
//! services drifted via [`diff`], projects them onto Kubernetes objects with
//! [`translator`], applies the result, and finally lets the [`reaper`] remove
//! objects whose declarations are gone.
//!
//! Identity is carried entirely by labels: an object without
//! `creator=pipeline` is invisible to this crate, both when reading and when
//! reaping.

pub mod cluster;
pub mod diff;
pub mod git;
pub mod k8s;
pub mod labels;
pub mod model;
pub mod reaper;
pub mod reconciler;
pub mod translator;
