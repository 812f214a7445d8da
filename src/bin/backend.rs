//! Conversation backend binary for local development.
//! Run with: cargo run --bin chatlens-backend

use std::process::ExitCode;

use chatlens_sync::start_backend;

fn main() -> ExitCode {
    start_backend::run()
}
