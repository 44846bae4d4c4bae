use clap::ArgMatches;
use std::path::PathBuf;

/// Parsed command-line configuration: the object images to load, in the order given. May be
/// empty — `IMAGE` is deliberately *not* marked `required` at the `clap` layer, so that a
/// zero-image invocation reaches `lib::run` and is reported as `VmError::NoImages` (exit code 2)
/// instead of being swallowed by `clap`'s own usage-error path (exit code 1).
#[derive(Debug, PartialEq)]
pub struct Config {
    pub images: Vec<PathBuf>,
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let images = matches
            .values_of("IMAGE")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default();

        Self { images }
    }
}
