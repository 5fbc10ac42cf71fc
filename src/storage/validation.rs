//! Filename sanitization, token format, and blob key derivation.
//!
//! Client-supplied filenames are untrusted. Everything that reaches the
//! filesystem or an object key goes through [`sanitize_file_name`], so no
//! client input can address a path outside the storage root.

use tracing::warn;

use super::error::{Result, StorageError};

/// Longest file name most filesystems accept, in bytes.
const MAX_KEY_LEN: usize = 255;

/// Maximum sanitized filename length in bytes, leaving room for the
/// `{token}_` prefix of the blob key.
pub const MAX_NAME_LEN: usize = MAX_KEY_LEN - TOKEN_LEN - 1;

/// Length of a token in hex characters.
pub const TOKEN_LEN: usize = 32;

/// Reduces a client-supplied filename to a safe bare filename.
///
/// - Keeps only the last segment after splitting on `/` and `\`
/// - Removes control characters (including NUL)
/// - Trims surrounding whitespace
///
/// # Errors
///
/// Returns [`StorageError::InvalidInput`] if the result is empty, `.`, `..`,
/// or longer than [`MAX_NAME_LEN`] bytes.
///
/// # Examples
///
/// ```
/// use filerelay::storage::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("notes.txt").unwrap(), "notes.txt");
/// assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
/// assert!(sanitize_file_name("uploads/..").is_err());
/// ```
pub fn sanitize_file_name(raw: &str) -> Result<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    if last.len() != raw.len() {
        warn!(
            security_event = "path_component_stripped",
            name = %raw.chars().filter(|c| !c.is_control()).collect::<String>(),
            "Stripped directory components from uploaded filename"
        );
    }

    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(StorageError::invalid_input("file name is empty"));
    }
    if cleaned == "." || cleaned == ".." {
        return Err(StorageError::invalid_input(format!(
            "file name cannot be '{cleaned}'"
        )));
    }
    if cleaned.len() > MAX_NAME_LEN {
        return Err(StorageError::invalid_input(format!(
            "file name is too long (max {MAX_NAME_LEN} bytes)"
        )));
    }

    Ok(cleaned.to_string())
}

/// Generates a fresh token: 128 random bits as lowercase hex.
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Returns true if `candidate` has the token format.
pub fn is_valid_token(candidate: &str) -> bool {
    candidate.len() == TOKEN_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Storage key for a blob: `{token}_{name}`.
pub fn blob_key(token: &str, sanitized_name: &str) -> String {
    format!("{token}_{sanitized_name}")
}

/// Extracts the token from a blob key, if the key has the blob key shape.
pub fn token_from_blob_key(key: &str) -> Option<&str> {
    let (token, name) = key.split_once('_')?;
    (is_valid_token(token) && !name.is_empty()).then_some(token)
}

/// Checks that a storage key is a bare filename safe to join onto a root.
///
/// # Errors
///
/// Returns [`StorageError::InvalidInput`] if the key is empty, `.`/`..`, or
/// contains separators or control characters.
pub(crate) fn ensure_bare_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\'])
        || key.chars().any(char::is_control)
    {
        warn!(
            security_event = "unsafe_storage_key",
            key = %key.chars().filter(|c| !c.is_control()).collect::<String>(),
            "Blocked unsafe storage key"
        );
        return Err(StorageError::invalid_input(format!(
            "unsafe storage key: {key:?}"
        )));
    }
    Ok(())
}
