use clap::Parser;

use hotplugd::cli::Config;
use hotplugd::daemon::Daemon;

fn main() {
    let config = Config::parse();
    init_logging(config.verbose);

    let mut daemon = match Daemon::start(&config) {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("hotplugd: {e}");
            std::process::exit(1);
        }
    };

    daemon.run();
}

/// `-v`/`--verbose` raises the default log level; an explicit `RUST_LOG` always wins.
fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        let level = match verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        builder.filter_level(level);
    }
    builder.init();
}
