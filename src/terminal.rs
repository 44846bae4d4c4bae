use libc::STDIN_FILENO;
use nix::sys::select::{select, FdSet};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, Termios};
use nix::sys::time::{TimeVal, TimeValLike};
use std::io::{self, Read, Write};

/// The host-side keyboard poll and byte I/O the core's memory-mapped device register and trap
/// services are driven through. Production code talks to `StdTerminal`; tests substitute a
/// scripted, buffer-backed fake so the interpreter's traps can be exercised without a TTY.
pub trait Terminal {
    /// Returns whether a byte is currently available on stdin, without blocking.
    fn poll_ready(&mut self) -> bool;

    /// Blocks until one byte is available and returns it.
    fn read_byte(&mut self) -> io::Result<u8>;

    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

pub struct StdTerminal;

impl Terminal for StdTerminal {
    fn poll_ready(&mut self) -> bool {
        let mut readfds = FdSet::new();
        readfds.insert(STDIN_FILENO);

        matches!(
            select(None, &mut readfds, None, None, &mut TimeVal::zero()),
            Ok(n) if n > 0
        )
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0u8; 1];
        io::stdin().read_exact(&mut buffer)?;
        Ok(buffer[0])
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        io::stdout().write_all(&[byte])
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// Puts stdin into non-canonical, no-echo mode and returns the previous settings so the caller
/// can restore them later, from whichever exit path the process actually takes.
pub fn enable_raw_mode() -> nix::Result<Termios> {
    let original = tcgetattr(STDIN_FILENO)?;

    let mut raw = original.clone();
    raw.local_flags &= !(LocalFlags::ICANON | LocalFlags::ECHO);
    tcsetattr(STDIN_FILENO, SetArg::TCSANOW, &raw)?;

    Ok(original)
}

/// Restores terminal settings captured by `enable_raw_mode`. Best-effort: called from normal
/// exit, from fault handling, and from the SIGINT handler, so a failure here must never panic.
pub fn restore_mode(original: &Termios) {
    let _ = tcsetattr(STDIN_FILENO, SetArg::TCSANOW, original);
}
