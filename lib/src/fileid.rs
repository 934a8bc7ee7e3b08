//! Deterministic mapping of filesystem paths to repository identifiers.
//!
//! The id of an ingested file is `idPrefix + encoded(relative path)`, so
//! re-running an ingest finds the resources it created before. Paths are
//! converted from the host encoding to UTF-8 first; the encoding is derived
//! from the locale once and published process-wide.

use std::path::Path;

#[cfg(unix)]
use encoding_rs::Encoding;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters the id encoding leaves verbatim: URI unreserved characters,
/// the path separator, and `%` so that an already-encoded suffix re-encodes
/// to itself.
const ID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'%');

/// The host path encoding is not UTF-8 and could not be identified.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot convert path {path:?} to UTF-8: host encoding {encoding:?} unknown")]
pub struct PathEncodingUnknown {
    /// The offending path, lossily rendered.
    pub path: String,
    /// What the locale declared, if anything.
    pub encoding: Option<String>,
}

/// Derive the repository id for `path` relative to `directory`.
///
/// `directory` is treated as ending with a separator; the remainder of the
/// path is percent-encoded with `/` preserved and appended to `id_prefix`
/// (which gains a trailing `/` when non-empty and missing one).
pub fn derive(
    path: &Path,
    directory: &Path,
    id_prefix: &str,
) -> Result<String, PathEncodingUnknown> {
    let path = to_utf8(path)?.replace('\\', "/");
    let mut dir = to_utf8(directory)?.replace('\\', "/");
    if !dir.ends_with('/') {
        dir.push('/');
    }
    let suffix = path
        .strip_prefix(&dir)
        .unwrap_or_else(|| path.strip_prefix(&dir[..dir.len() - 1]).unwrap_or(&path))
        .trim_start_matches('/');
    let encoded = utf8_percent_encode(suffix, ID_ENCODE_SET);
    let sep = if id_prefix.is_empty() || id_prefix.ends_with('/') {
        ""
    } else {
        "/"
    };
    Ok(format!("{id_prefix}{sep}{encoded}"))
}

/// Convert a host path to UTF-8 using the locale-detected encoding.
pub fn to_utf8(path: &Path) -> Result<String, PathEncodingUnknown> {
    if let Some(s) = path.to_str() {
        return Ok(s.to_string());
    }
    decode_non_utf8(path)
}

#[cfg(unix)]
fn decode_non_utf8(path: &Path) -> Result<String, PathEncodingUnknown> {
    use std::os::unix::ffi::OsStrExt;
    let bytes = path.as_os_str().as_bytes();
    match host_encoding() {
        Some(encoding) if encoding != encoding_rs::UTF_8 => {
            let (decoded, _, had_errors) = encoding.decode(bytes);
            if had_errors {
                Err(unknown(path))
            } else {
                Ok(decoded.into_owned())
            }
        }
        _ => Err(unknown(path)),
    }
}

#[cfg(not(unix))]
fn decode_non_utf8(path: &Path) -> Result<String, PathEncodingUnknown> {
    Err(unknown(path))
}

fn unknown(path: &Path) -> PathEncodingUnknown {
    PathEncodingUnknown {
        path: path.to_string_lossy().into_owned(),
        encoding: locale_codeset(),
    }
}

/// The encoding named by the locale, computed and published exactly once.
#[cfg(unix)]
fn host_encoding() -> Option<&'static Encoding> {
    use std::sync::OnceLock;
    static HOST: OnceLock<Option<&'static Encoding>> = OnceLock::new();
    *HOST.get_or_init(|| {
        let codeset = locale_codeset()?;
        Encoding::for_label(codeset.as_bytes())
    })
}

/// The codeset part of the effective locale, e.g. `UTF-8` of `de_AT.UTF-8`.
fn locale_codeset() -> Option<String> {
    for var in ["LC_ALL", "LC_CTYPE", "LANG"] {
        let Ok(value) = std::env::var(var) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let codeset = match value.split_once('.') {
            Some((_, codeset)) => codeset.split('@').next().unwrap_or(codeset),
            None => return None,
        };
        return Some(codeset.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = derive(
            Path::new("/data/sub dir/file one.txt"),
            Path::new("/data"),
            "https://id.example.org/corpus",
        )
        .unwrap();
        let b = derive(
            Path::new("/data/sub dir/file one.txt"),
            Path::new("/data/"),
            "https://id.example.org/corpus/",
        )
        .unwrap();
        assert_eq!(a, "https://id.example.org/corpus/sub%20dir/file%20one.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_is_idempotent_under_reencoding() {
        let once = derive(Path::new("/d/ä b.txt"), Path::new("/d"), "").unwrap();
        let twice = derive(Path::new(&format!("/d/{once}")), Path::new("/d"), "").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn backslashes_become_separators() {
        let id = derive(Path::new("/d/a\\b.txt"), Path::new("/d"), "x:/").unwrap();
        assert_eq!(id, "x:/a/b.txt");
    }

    #[test]
    fn empty_prefix_keeps_bare_suffix() {
        let id = derive(Path::new("/d/a.txt"), Path::new("/d"), "").unwrap();
        assert_eq!(id, "a.txt");
    }

    #[test]
    fn directory_record_gets_relative_id() {
        let id = derive(Path::new("/d/sub"), Path::new("/d"), "p:/x").unwrap();
        assert_eq!(id, "p:/x/sub");
    }
}
