//! Explicit description of the program being benchmarked, standing in for the process-global
//! `argv[0]`/interpreter-path state the distilled design leans on (see "Global interpreter state"
//! in `SPEC_FULL.md`'s design notes).

use std::path::PathBuf;

/// Describes the program a [`crate::runner::Runner`] is embedded in, and the capability flags the
/// Policy Resolver needs.
#[derive(Clone, Debug)]
pub struct RuntimeDescriptor {
    /// Absolute path to the executable that should be re-invoked in worker mode.
    pub executable: PathBuf,
    /// Extra leading arguments to splice before `--worker` when re-invoking (e.g. a subcommand
    /// name), mirroring the distilled design's `program_args`.
    pub program_args: Vec<String>,
    /// Whether the runtime has a JIT, which shifts the Policy Resolver's defaults (§4.1 rule 11).
    pub has_jit: bool,
}

impl RuntimeDescriptor {
    /// Build a descriptor from the current executable, with no extra leading arguments and no
    /// JIT.
    ///
    /// # Errors
    /// Returns an error if `std::env::current_exe` fails to resolve.
    pub fn current() -> std::io::Result<Self> {
        Ok(RuntimeDescriptor {
            executable: std::env::current_exe()?,
            program_args: Vec::new(),
            has_jit: false,
        })
    }
}
