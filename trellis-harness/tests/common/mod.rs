#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// Directory holding the `trellis-process` fixture binaries.
///
/// `TRELLIS_FIXTURE_DIR` wins; otherwise the shared workspace target
/// directory next to this crate's own binary is used. Fixtures are only
/// there when the whole workspace was built (`cargo test --workspace`).
pub fn fixture_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TRELLIS_FIXTURE_DIR") {
        return PathBuf::from(dir);
    }
    Path::new(env!("CARGO_BIN_EXE_trellis-harness"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Path to a fixture binary, or `None` (with a note on stderr) when it has
/// not been built.
pub fn fixture_bin(name: &str) -> Option<String> {
    let path = fixture_dir().join(format!("{}{}", name, std::env::consts::EXE_SUFFIX));
    if path.is_file() {
        Some(path.to_string_lossy().into_owned())
    } else {
        eprintln!("skipping: fixture {} not built at {}", name, path.display());
        None
    }
}
