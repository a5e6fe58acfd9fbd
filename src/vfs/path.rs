//! String helpers for virtual paths.
//!
//! Archive entry names use either `/` or `\` as separator, sometimes both in
//! one archive, so nothing here goes through [`std::path::Path`] except
//! [`sanitize_relative`], which produces a real on-disk path.
//!
//! | Helper | `"data\\sub/Image.PNG"` |
//! |--------|-------------------------|
//! | [`file_name`] | `"Image.PNG"` |
//! | [`extension`] | `Some("PNG")` |
//! | [`directory_name`] | `"data\\sub"` |

use std::path::PathBuf;

use glob::{MatchOptions, Pattern};

use crate::{Error, Result};

/// Separator of virtual paths produced by this crate.
pub const DELIMITER: char = '/';
/// Name of the parent directory.
pub const PARENT: &str = "..";
/// Name of the current directory.
pub const CURRENT: &str = ".";

/// Characters ending a directory or drive component.
const NAME_SEPARATORS: [char; 3] = ['\\', '/', ':'];

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Final component of `path`.
pub fn file_name(path: &str) -> &str {
    match path.rfind(NAME_SEPARATORS) {
        Some(sep) => &path[sep + 1..],
        None => path,
    }
}

/// Extension of the final component, without the dot.
///
/// Names starting with a dot and names ending with one have no extension.
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(dot) if dot >= 1 && dot + 1 < name.len() => Some(&name[dot + 1..]),
        _ => None,
    }
}

/// Everything before the last `/` or `\`, or `""` when there is none.
pub fn directory_name(path: &str) -> &str {
    match path.rfind(is_separator) {
        Some(sep) => &path[..sep],
        None => "",
    }
}

/// Whether `path` is absolute: `C:\...`, `\\server`, `/...` or `\...`.
pub fn is_path_rooted(path: &str) -> bool {
    let bytes = path.as_bytes();
    match bytes {
        [] => false,
        [drive, b':', sep, ..] if drive.is_ascii_alphabetic() && (*sep == b'\\' || *sep == b'/') => true,
        [first, ..] => *first == b'/' || *first == b'\\',
    }
}

/// Replace every `\` with `/`.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// `full` relative to `base` when it lies under it (case-insensitive),
/// otherwise just its file name.
pub fn relative_path<'a>(full: &'a str, base: &str) -> &'a str {
    match full.get(..base.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(base) => full[base.len()..].trim_start_matches(is_separator),
        _ => file_name(full),
    }
}

/// Join `base` and `name` with `/` unless one is empty or `base` already
/// ends with a separator.
pub fn combine_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_owned();
    }
    if name.is_empty() {
        return base.to_owned();
    }
    if base.ends_with(is_separator) {
        format!("{base}{name}")
    } else {
        format!("{base}{DELIMITER}{name}")
    }
}

/// Whether the file-name portion of `path` is exactly `filename`, ignoring
/// ASCII case.
pub fn is_path_equal_to_file_name(path: &str, filename: &str) -> bool {
    file_name(path).eq_ignore_ascii_case(filename)
}

/// Replace the final component of `path` with `target`.
pub fn change_file_name(path: &str, target: &str) -> String {
    combine_path(directory_name(path), target)
}

/// Turn an archive entry name into a relative on-disk path that cannot
/// escape the directory it is joined to.
///
/// Empty, `.` and `..` components and drive prefixes are dropped; characters
/// invalid in file names become `_`.
pub fn sanitize_relative(name: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for (i, part) in name.split(is_separator).enumerate() {
        if part.is_empty() || part == CURRENT || part == PARENT {
            continue;
        }
        if i == 0 && part.len() == 2 && part.ends_with(':') {
            continue;
        }
        out.push(sanitize_file_name(part));
    }
    if out.as_os_str().is_empty() {
        out.push("_");
    }
    out
}

/// Replace characters that are invalid in a file name with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Case-insensitive file-name wildcard (`*` and `?`).
///
/// A trailing `.*` also matches names without an extension, so `*` and
/// `*.*` select the same files.
#[derive(Debug, Clone)]
pub struct FileNameGlob {
    pattern: Pattern,
    stem: Option<Pattern>,
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl FileNameGlob {
    pub fn new(pattern: &str) -> Result<Self> {
        let stem = match pattern.strip_suffix(".*") {
            Some(stem) => Some(Self::compile(stem)?),
            None => None,
        };
        Ok(Self {
            pattern: Self::compile(pattern)?,
            stem,
        })
    }

    /// Only `*` and `?` are wildcards; everything else matches literally.
    fn compile(pattern: &str) -> Result<Pattern> {
        let mut escaped = String::with_capacity(pattern.len());
        for c in pattern.chars() {
            match c {
                '*' | '?' => escaped.push(c),
                c => escaped.push_str(&Pattern::escape(c.encode_utf8(&mut [0u8; 4]))),
            }
        }
        Pattern::new(&escaped).map_err(|_| Error::InvalidFormat("invalid file name pattern"))
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.pattern.matches_with(name, GLOB_OPTIONS)
            || self
                .stem
                .as_ref()
                .is_some_and(|stem| stem.matches_with(name, GLOB_OPTIONS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_parts() {
        assert_eq!(file_name("a/b\\c.txt"), "c.txt");
        assert_eq!(file_name("C:file.bin"), "file.bin");
        assert_eq!(file_name("plain"), "plain");
        assert_eq!(extension("dir.d/archive.tar.gz"), Some("gz"));
        assert_eq!(extension("dir.d/noext"), None);
        assert_eq!(extension(".hidden"), None);
        assert_eq!(extension("trailing."), None);
        assert_eq!(directory_name("a/b\\c.txt"), "a/b");
        assert_eq!(directory_name("c.txt"), "");
    }

    #[test]
    fn rooted_paths() {
        assert!(is_path_rooted("C:\\Windows"));
        assert!(is_path_rooted("d:/games"));
        assert!(is_path_rooted("\\\\server\\share"));
        assert!(is_path_rooted("/usr"));
        assert!(!is_path_rooted("C:relative"));
        assert!(!is_path_rooted("data/file"));
        assert!(!is_path_rooted(""));
    }

    #[test]
    fn combining() {
        assert_eq!(combine_path("", "x"), "x");
        assert_eq!(combine_path("a", ""), "a");
        assert_eq!(combine_path("a\\", "x"), "a\\x");
        assert_eq!(combine_path("a", "x"), "a/x");
        assert_eq!(change_file_name("dir/old.bin", "new.bin"), "dir/new.bin");
        assert_eq!(change_file_name("old.bin", "new.bin"), "new.bin");
        assert_eq!(normalize_path("a\\b/c"), "a/b/c");
    }

    #[test]
    fn relative_and_equality() {
        assert_eq!(relative_path("/Data/Sub/file.bin", "/data"), "Sub/file.bin");
        assert_eq!(relative_path("/other/file.bin", "/data"), "file.bin");
        assert!(is_path_equal_to_file_name("dir/SCRIPT.DAT", "script.dat"));
        assert!(!is_path_equal_to_file_name("dir/xscript.dat", "script.dat"));
    }

    #[test]
    fn sanitizing_never_escapes() {
        assert_eq!(sanitize_relative("../evil"), PathBuf::from("evil"));
        assert_eq!(sanitize_relative("C:\\win\\sys.dll"), PathBuf::from("win").join("sys.dll"));
        assert_eq!(sanitize_relative("/abs/./x"), PathBuf::from("abs").join("x"));
        assert_eq!(sanitize_relative("a?b"), PathBuf::from("a_b"));
        assert_eq!(sanitize_relative(".."), PathBuf::from("_"));
    }

    #[test]
    fn glob_matching() {
        let all = FileNameGlob::new("*.*").unwrap();
        assert!(all.is_match("readme"));
        assert!(all.is_match("image.png"));

        let png = FileNameGlob::new("*.PNG").unwrap();
        assert!(png.is_match("bg01.png"));
        assert!(!png.is_match("bg01.pngx"));

        let single = FileNameGlob::new("bg0?.png").unwrap();
        assert!(single.is_match("BG07.png"));
        assert!(!single.is_match("bg10.png"));

        let literal = FileNameGlob::new("[x].bin").unwrap();
        assert!(literal.is_match("[x].bin"));
        assert!(!literal.is_match("x.bin"));
    }
}
