//! TruthLens HTTP API server.
//! Run with: cargo run --bin truthlens-server

use std::process::ExitCode;

use truthlens_agent::start_truthlens_agent;

fn main() -> ExitCode {
    start_truthlens_agent::run()
}
