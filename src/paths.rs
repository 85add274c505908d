use std::io;

use camino::{Utf8Path, Utf8PathBuf};

/// Resolves a path to an absolute one, with symlinks and `.`/`..` segments
/// resolved. The path must exist and be valid UTF-8.
pub fn canonicalize(path: impl AsRef<Utf8Path>) -> io::Result<Utf8PathBuf> {
    path.as_ref().canonicalize_utf8()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_relative_segments() {
        let direct = canonicalize("Cargo.toml").unwrap();
        let roundabout = canonicalize("src/../Cargo.toml").unwrap();

        assert!(direct.is_absolute());
        assert_eq!(direct, roundabout);
    }

    #[test]
    fn test_missing_path() {
        let err = canonicalize("does/not/exist").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
