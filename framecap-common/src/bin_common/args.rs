use std::{ffi::OsString, path::Path};

use color_eyre::eyre::{self, Context};

use crate::utils::fsutils::read_optional_file;

/// The arguments of the current process. If only the program name was given, then the
/// whitespace separated flags in `rc_file` are appended, if that file exists.
pub fn args_or_rc_file(rc_file: impl AsRef<Path>) -> eyre::Result<Vec<OsString>> {
    let args: Vec<OsString> = std::env::args_os().collect();
    extend_from_rc_file(args, rc_file)
}

fn extend_from_rc_file(
    mut args: Vec<OsString>,
    rc_file: impl AsRef<Path>,
) -> eyre::Result<Vec<OsString>> {
    let rc_file = rc_file.as_ref();
    if args.len() == 1 {
        if let Some(flags) = read_optional_file(rc_file).wrap_err_with(|| {
            format!("Could not read config file at: {}", rc_file.display())
        })? {
            args.extend(flags.split_whitespace().map(OsString::from));
        }
    }
    Ok(args)
}
