use log::debug;
use std::env;
use std::fs;
use std::path::Path;

/// libtorch release torch-sys 0.18 checks for at build time.
pub const LIBTORCH_BINDING_VERSION: &str = "2.5.1";

/// Version string of the installed framework.
///
/// libtorch distributions ship a `build-version` file (e.g. `2.5.1+cu124`) at
/// the root of the install. When `LIBTORCH` points at one, that file wins;
/// otherwise the bindings' own release is reported.
pub fn framework_version() -> String {
    if let Ok(dir) = env::var("LIBTORCH") {
        match read_build_version(Path::new(&dir)) {
            Ok(Some(version)) => return version,
            Ok(None) => debug!("No build-version file under {}", dir),
            Err(e) => debug!("Could not read build-version under {}: {}", dir, e),
        }
    }
    LIBTORCH_BINDING_VERSION.to_string()
}

/// Reads the first non-empty line of `<dir>/build-version`, if the file exists.
pub fn read_build_version(dir: &Path) -> std::io::Result<Option<String>> {
    let path = dir.join("build-version");
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string))
}
