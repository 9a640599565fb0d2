#[macro_use]
extern crate log;

use gumdrop::Options;
use std::process;

use rightsizer::prelude::*;
use rightsizer::util;

fn main() {
    let configuration = LoadTestConfiguration::parse_args_default_or_exit();

    if configuration.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        process::exit(0);
    }

    configuration.initialize_logger();

    let settings = match configuration.settings() {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let canceled = CancellationToken::new();
    util::setup_ctrlc_handler(&canceled);

    if let Err(e) = LoadTest::new(settings).execute(canceled) {
        error!("load test failed: {}", e);
        process::exit(1);
    }
}
