//! Reviewer job - background CI and submission pipeline for code review diffs.
//!
//! A diff is a `D<id>` branch spread over one or more git repositories. Once a
//! diff is approved and submitted, the CI task runs each repository's
//! `reviewer-ci.sh` against the diff's commits and the submitter task merges
//! and pushes the diff when CI passed on the commits that are still current.
//! The two tasks share no memory; they exchange work through a document store.

pub mod config;
pub mod git;
pub mod process;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod submission;
pub mod tasks;
pub mod types;

#[cfg(test)]
pub mod test_utils;
