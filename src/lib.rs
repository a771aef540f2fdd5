//! pairchat broker server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod broker;
pub mod chats;
pub mod config;
pub mod db;
pub mod routes;
pub mod state;
pub mod users;
pub mod ws;
