//! Run orchestration, decoupled from argument parsing so runs can be started
//! programmatically.

pub mod orchestration;

pub use orchestration::{run, DiffMode, RunArgs, RunReport, SideReport};
