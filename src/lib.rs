// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent provisioner for R_S development machines.
//!
//! Brings a workstation from an unknown state to a fully provisioned conda
//! environment with every internally developed package cloned and installed.
//! Provisioning is a fixed sequence of [steps](provision::Step), each checking
//! whether it is already satisfied before doing anything. Rerunning is always
//! safe, and a rerun on a fully provisioned machine changes nothing.
//!
//! See [`provision`] for the sequencing rules, and [`provision::plan`] for the
//! standard sequence itself.

pub mod config;
pub mod exec;
pub mod kv;
pub mod manifest;
pub mod path;
pub mod provision;
pub mod repo;

pub use config::Settings;
pub use provision::{Mode, Outcome, Provisioner, Session};
