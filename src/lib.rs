pub mod config;
pub mod cpu;
pub mod error;
pub mod file_loader;
pub mod instruction;
pub mod sign_extend;
pub mod state;
pub mod terminal;
pub mod trap_vector;

pub use crate::config::Config;
pub use crate::sign_extend::SignExtend;
use crate::error::VmError;
use crate::state::State;
use crate::terminal::Terminal;
use log::{debug, info};

/// Loads every configured image into a fresh machine, then runs fetch-decode-execute until the
/// guest halts or a fault occurs. The caller maps the `Result` to a process exit code.
pub fn run(config: Config, terminal: &mut dyn Terminal) -> Result<(), VmError> {
    if config.images.is_empty() {
        return Err(VmError::NoImages);
    }

    let mut state = State::new();

    for path in &config.images {
        info!("loading image {}", path.display());
        file_loader::load_image(path, &mut state.memory)?;
    }

    debug!("starting execution at pc={:#06x}", state.pc);

    while state.running {
        cpu::step(&mut state, terminal)?;
    }

    info!("halted");

    Ok(())
}
