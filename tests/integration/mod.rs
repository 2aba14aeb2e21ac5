//! Integration tests for Puppeteer
//!
//! These tests verify that registry, codec, engine, channels and sinks work
//! together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod recording_replay;
pub mod scenarios;
