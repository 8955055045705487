//! Confab is a terminal-first chat client for working with remote LLM APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns runtime state, configuration, provider/model resolution,
//!   and streaming orchestration.
//! - [`ui`] renders the terminal interface and runs the interactive event loop
//!   that drives user input and display updates.
//! - [`commands`] implements slash-command parsing and execution used by the
//!   chat loop.
//! - [`mcp`] launches and talks to Model Context Protocol servers so models
//!   can call their tools mid-reply.
//! - [`api`] defines the chat payloads spoken to providers on the wire.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which bootstraps [`core::app`] and hands it
//! to [`ui::chat_loop`] for the interactive session.

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod mcp;
pub mod ui;
pub mod utils;
