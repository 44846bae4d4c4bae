use clap::{App, Arg};
use lc3vm::error::VmError;
use lc3vm::terminal::{enable_raw_mode, restore_mode, StdTerminal};
use lc3vm::Config;
use log::error;
use std::process;
use std::sync::{Arc, Mutex};

/// `IMAGE` is deliberately not `required`: a zero-image invocation must reach `lc3vm::run` so it
/// comes back as `VmError::NoImages` and maps to exit code 2, rather than being rejected by
/// `clap`'s own usage-error path, which exits 1.
fn main() {
    env_logger::init();

    let matches = App::new("lc3vm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A virtual machine for the LC-3 educational ISA")
        .arg(
            Arg::with_name("IMAGE")
                .help("One or more object files to load, in order, before execution starts")
                .multiple(true)
                .index(1),
        )
        .get_matches();

    let config = Config::from_matches(&matches);

    let original_mode = enable_raw_mode().unwrap_or_else(|err| {
        eprintln!("failed to set up the terminal: {}", err);
        process::exit(1);
    });
    let original_mode = Arc::new(Mutex::new(Some(original_mode)));

    {
        let original_mode = Arc::clone(&original_mode);
        ctrlc::set_handler(move || {
            if let Some(mode) = original_mode.lock().unwrap().take() {
                restore_mode(&mode);
            }
            process::exit(130);
        })
        .unwrap_or_else(|err| {
            eprintln!("failed to install signal handler: {}", err);
        });
    }

    let mut terminal = StdTerminal;
    let result = lc3vm::run(config, &mut terminal);

    if let Some(mode) = original_mode.lock().unwrap().take() {
        restore_mode(&mode);
    }

    if let Err(err) = result {
        error!("{}", err);

        let code = match err {
            VmError::NoImages => 2,
            _ => 1,
        };
        process::exit(code);
    }
}
