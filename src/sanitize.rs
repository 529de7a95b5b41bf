//! Filesystem-safe file names for per-test profiles

/// Characters that may not appear in a profile file name
pub const FORBIDDEN_CHARS: &[char] = &['/', '?', '<', '>', '\\', ':', '*', '|', '"'];

/// Turn a test identifier into a file name fragment.
///
/// Every forbidden character and every character at or above codepoint 127
/// becomes exactly one `_`. Nothing is truncated, so two names that differ
/// only in replaced characters map to the same file.
///
/// # Example
/// ```
/// use testprof::sanitize::clean_filename;
///
/// assert_eq!(clean_filename("test_b/weird:name"), "test_b_weird_name");
/// assert_eq!(clean_filename("caf\u{e9}"), "caf_");
/// ```
pub fn clean_filename(name: &str) -> String {
    name.chars()
        .map(|c| if is_safe(c) { c } else { '_' })
        .collect()
}

fn is_safe(c: char) -> bool {
    (c as u32) < 127 && !FORBIDDEN_CHARS.contains(&c)
}
