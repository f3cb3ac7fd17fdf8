//! Test helpers: fake converter binaries written as shell scripts.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::converter::Converter;

/// Prints a few lines and copies the input to the output, like a well-behaved converter.
pub const SUCCESS_SCRIPT: &str = "\
[ \"$3\" = \"--pdf-page-numbers\" ] || exit 3
echo \"Converting $1\"
echo \"Rendering pages\" >&2
cp \"$1\" \"$2\"
";

/// Write an executable `sh` script named `ebook-convert` into `dir`.
pub fn fake_converter(dir: &Path, body: &str) -> Converter {
    let path = dir.join("ebook-convert");
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    Converter::at(path)
}
