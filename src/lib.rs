pub mod agent;
pub mod child;
pub mod cli;
pub mod client;
pub mod error;
pub mod format;
pub mod frame;
pub mod line_editor;
pub mod logging;
pub mod proto;
pub mod repl;
pub mod session;
