use crate::error::VmError;
use crate::state::memory::Memory;
use byteorder::{BigEndian, ReadBytesExt};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Loads an LC-3 object image into `memory`. The first word is the origin address; every word
/// after it is written starting there, wrapping the address space's upper bound at `0xFFFF`. A
/// trailing odd byte (a malformed image) is silently discarded, matching the reference loader.
pub fn load_image(path: &Path, memory: &mut Memory) -> Result<(), VmError> {
    let to_error = |source: std::io::Error| VmError::ImageLoad {
        path: PathBuf::from(path),
        source,
    };

    let file = fs::File::open(path).map_err(to_error)?;
    let mut reader = BufReader::new(file);

    let mut address = reader.read_u16::<BigEndian>().map_err(to_error)?;

    loop {
        match reader.read_u16::<BigEndian>() {
            Ok(word) => {
                memory.write(address, word);
                if address == 0xFFFF {
                    break;
                }
                address = address.wrapping_add(1);
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(to_error(e)),
        }
    }

    Ok(())
}
