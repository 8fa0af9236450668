//! Ed discussion to Slack notifier library.
//!
//! Polls a course's discussion threads, announces new threads in chat and
//! mirrors thread state (deleted, private, answered) as reactions on the
//! announcement messages. Also ships the small backend that collects forum
//! tokens and completes the chat app's OAuth flow.

pub mod chat;
pub mod config;
pub mod constants;
pub mod error;
pub mod forum;
pub mod notifier;
pub mod reconcile;
pub mod snapshot;
pub mod tokens;
pub mod web;
