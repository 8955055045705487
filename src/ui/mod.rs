//! Terminal UI layer for interactive chat sessions.
//!
//! [`chat_loop`] runs the interaction loop that dispatches user input to
//! [`crate::commands`] and coordinates streaming via
//! [`crate::core::chat_stream`]. [`renderer`] composes each frame, and
//! [`markdown`] turns assistant replies into styled lines.

pub mod chat_loop;
pub mod markdown;
pub mod renderer;
