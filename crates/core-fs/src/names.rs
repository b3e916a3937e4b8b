//! Validation for names that end up in filenames or config keys.

/// Whether `name` is safe to embed in a filename: non-empty and limited
/// to ASCII alphanumerics, `+`, `,`, `-`, `.` and `_`.
pub fn allowed_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|c| {
            c.is_ascii_alphanumeric() || (b'+'..=b'.').contains(&c) || c == b'_'
        })
}

/// Whether `text` is safe to store and print: ASCII printable only.
pub fn allowed_text(text: &str) -> bool {
    text.bytes().all(|c| (b' '..=b'~').contains(&c))
}
