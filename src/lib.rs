// SPDX-License-Identifier: MIT

//! relay-rs: a resumable graph-workflow engine with an email-triage agent
//! built on top.
//!
//! The [`flow`] module is the generic piece: graphs of named steps over a
//! shared state map, driven by an executor that can suspend mid-run for an
//! external decision and resume from a checkpoint later. The [`triage`]
//! module wires that engine into a concrete support workflow: classify an
//! incoming email, hand it to the right handler, escalate to a human
//! reviewer when the stakes are high, draft a reply and send it.

pub mod flow;
pub mod triage;
