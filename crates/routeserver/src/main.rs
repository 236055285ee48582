//! Routeserver.
//!
//! Routeserver prepares and serves large routing datasets, such as transport networks and
//! opportunity grids, and runs long computations on them in the background while reporting their
//! progress to the users that started them.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod endpoints;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
