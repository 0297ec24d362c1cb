//! Path and free-form-field sanitization shared by the builder.

use std::path::{Component, Path, PathBuf};

use crate::error::ArgumentBuilderError;

/// Rejects any path containing a `..` path segment. Absolute paths are
/// permitted — this targets traversal out of an allowed root, not
/// absolute-path use in general.
pub(super) fn reject_traversal(field: &'static str, path: &Path) -> Result<(), ArgumentBuilderError> {
    let has_parent_segment = path
        .components()
        .any(|component| matches!(component, Component::ParentDir));
    if has_parent_segment {
        return Err(ArgumentBuilderError::PathTraversal {
            field,
            path: path.to_string_lossy().into_owned(),
        });
    }
    Ok(())
}

/// Strips NUL bytes from a free-form string field before it is tokenized or
/// embedded in an argv element.
pub(super) fn strip_null_bytes(value: &str) -> String {
    if value.contains('\0') {
        value.chars().filter(|c| *c != '\0').collect()
    } else {
        value.to_string()
    }
}

/// Derives `<stem>_converted.<outputFormat>` inside `output_dir`.
pub(super) fn derive_output_path(input: &Path, output_dir: &Path, output_format: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{stem}_converted.{output_format}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_traversal() {
        let err = reject_traversal("input", Path::new("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, ArgumentBuilderError::PathTraversal { .. }));
    }

    #[test]
    fn rejects_traversal_embedded_mid_path() {
        let err = reject_traversal("input", Path::new("a/../../b")).unwrap_err();
        assert!(matches!(err, ArgumentBuilderError::PathTraversal { .. }));
    }

    #[test]
    fn permits_absolute_paths_without_traversal() {
        reject_traversal("input", Path::new("/srv/media/in.mp4")).expect("absolute path is fine");
    }

    #[test]
    fn strips_null_bytes_from_free_form_fields() {
        assert_eq!(strip_null_bytes("foo\0bar"), "foobar");
        assert_eq!(strip_null_bytes("clean"), "clean");
    }

    #[test]
    fn derives_converted_output_path() {
        let out = derive_output_path(Path::new("/in/clip.mov"), Path::new("/out"), "mp4");
        assert_eq!(out, Path::new("/out/clip_converted.mp4"));
    }
}
