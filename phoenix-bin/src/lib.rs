//! # Phoenix
//!
//! The `phoenix` binary fuzzes DDR5 DIMMs with refresh-synchronized, self-correcting
//! Rowhammer patterns and records every bit flip to a CSV file.
//!
//! ## Quickstart guide
//!
//! Reserve a 1 GiB hugepage, describe the DIMM's address mapping in a JSON file
//! (see `config/dimm-config.example.json`) and run as root:
//!
//! ```sh
//! echo 1 | sudo tee /sys/kernel/mm/hugepages/hugepages-1048576kB/nr_hugepages
//! cargo build --release
//! sudo target/release/phoenix --dimm-config config/dimm-config.json
//! ```
//!
//! Use `target/release/phoenix --help` to see available options.
//!
//! ## Modules
//!
//! - `dimm`: rank and capacity detection through `dmidecode`.
//! - `range`: the `start:end:step` sweep syntax of the command line.
//! - `observer`: CSV and progress bar sinks for fuzzing results.

pub mod dimm;
pub mod observer;
pub mod range;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}
