/// Length of a git commit hash in its hex rendition.
pub const SHA_LEN: usize = 40;

/// Whether `value` is a well-formed commit identifier: exactly 40 ASCII
/// alphanumeric characters. Build records are keyed by this value, so it is
/// also what keeps record paths inside the storage directory.
pub fn is_valid_sha(value: &str) -> bool {
    value.len() == SHA_LEN && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Whether `value` can be passed to git as a branch name without being
/// mistaken for an option or a revision expression.
pub fn is_safe_ref_name(value: &str) -> bool {
    if value.is_empty() || value.len() > 255 {
        return false;
    }
    if value.starts_with('-') || value.starts_with('/') || value.ends_with('/') {
        return false;
    }
    if value.contains("..") || value.contains("@{") || value.ends_with(".lock") {
        return false;
    }
    value.chars().all(|c| {
        !c.is_control() && !c.is_whitespace() && !matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\')
    })
}
