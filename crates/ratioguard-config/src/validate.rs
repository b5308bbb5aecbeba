//! Validation rules shared by every `ConfigStore` mutating operation.
//!
//! Kept separate from `service.rs` so the rules can be unit tested against
//! plain values, without a database in the loop.

use crate::error::ConfigError;

/// Lower clamp bound for any interval expressed in minutes.
pub const MIN_INTERVAL_MINUTES: i64 = 5;
/// Upper clamp bound for any interval expressed in minutes.
pub const MAX_INTERVAL_MINUTES: i64 = 1440;

/// Clamp an interval to `[MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES]`.
#[must_use]
pub fn clamp_interval_minutes(value: i64) -> i64 {
    value.clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
}

/// Validate a non-empty `download_dir` and resolve it to an absolute path
/// under `workdir`. Rejects absolute paths that escape `workdir` via `..`
/// or symlink-free traversal tricks expressed purely lexically.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] if `download_dir` is empty or
/// resolves outside `workdir`.
pub fn resolve_download_dir(workdir: &std::path::Path, download_dir: &str) -> Result<std::path::PathBuf, ConfigError> {
    if download_dir.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "download_dir",
            reason: "must not be empty".to_string(),
        });
    }

    let candidate = std::path::Path::new(download_dir);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workdir.join(candidate)
    };

    let normalized = normalize_lexically(&resolved);
    let normalized_workdir = normalize_lexically(workdir);
    if !normalized.starts_with(&normalized_workdir) {
        return Err(ConfigError::Validation {
            field: "download_dir",
            reason: "must resolve under the workdir base".to_string(),
        });
    }

    Ok(normalized)
}

/// Lexical `..`/`.` collapse; does not touch the filesystem, so it cannot be
/// fooled by symlinks but also cannot detect them — callers that need that
/// guarantee must canonicalize after creation.
fn normalize_lexically(path: &std::path::Path) -> std::path::PathBuf {
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Site auth methods understood by the store; mirrors
/// `ratioguard_core::site::SiteSchema`'s companion auth vocabulary.
const AUTH_METHODS: &[&str] = &["cookie", "api_key", "cookie_and_api_key", "passkey"];

/// Validate that a site's declared `auth_method` is recognised and that
/// credential fields match the mutual-exclusivity contract: fields outside
/// the declared method MUST be empty.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] if the method is unrecognised or a
/// method-irrelevant credential field is populated.
pub fn validate_site_auth(
    auth_method: &str,
    cookie: Option<&str>,
    api_key: Option<&str>,
    passkey: Option<&str>,
) -> Result<(), ConfigError> {
    if !AUTH_METHODS.contains(&auth_method) {
        return Err(ConfigError::Validation {
            field: "auth_method",
            reason: format!("unrecognised auth method `{auth_method}`"),
        });
    }

    let wants_cookie = matches!(auth_method, "cookie" | "cookie_and_api_key");
    let wants_api_key = matches!(auth_method, "api_key" | "cookie_and_api_key");
    let wants_passkey = auth_method == "passkey";

    let present = |value: Option<&str>| value.is_some_and(|v| !v.trim().is_empty());

    if wants_cookie && !present(cookie) {
        return Err(ConfigError::Validation {
            field: "cookie",
            reason: format!("required for auth method `{auth_method}`"),
        });
    }
    if !wants_cookie && present(cookie) {
        return Err(ConfigError::Validation {
            field: "cookie",
            reason: format!("must be empty for auth method `{auth_method}`"),
        });
    }
    if wants_api_key && !present(api_key) {
        return Err(ConfigError::Validation {
            field: "api_key",
            reason: format!("required for auth method `{auth_method}`"),
        });
    }
    if !wants_api_key && present(api_key) {
        return Err(ConfigError::Validation {
            field: "api_key",
            reason: format!("must be empty for auth method `{auth_method}`"),
        });
    }
    if wants_passkey && !present(passkey) {
        return Err(ConfigError::Validation {
            field: "passkey",
            reason: format!("required for auth method `{auth_method}`"),
        });
    }
    if !wants_passkey && present(passkey) {
        return Err(ConfigError::Validation {
            field: "passkey",
            reason: format!("must be empty for auth method `{auth_method}`"),
        });
    }

    Ok(())
}

/// Validate a site's stable identifier: `[a-z][a-z0-9_-]*`, at most 50 bytes.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] if the id is empty, too long, or
/// contains a disallowed character.
pub fn validate_site_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() || id.len() > 50 {
        return Err(ConfigError::Validation {
            field: "id",
            reason: "must be 1-50 characters".to_string(),
        });
    }
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        unreachable!("emptiness checked above");
    };
    if !first.is_ascii_lowercase() {
        return Err(ConfigError::Validation {
            field: "id",
            reason: "must start with a lowercase letter".to_string(),
        });
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(ConfigError::Validation {
            field: "id",
            reason: "must match [a-z][a-z0-9_-]*".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_interval_enforces_bounds() {
        assert_eq!(clamp_interval_minutes(1), MIN_INTERVAL_MINUTES);
        assert_eq!(clamp_interval_minutes(99_999), MAX_INTERVAL_MINUTES);
        assert_eq!(clamp_interval_minutes(30), 30);
    }

    #[test]
    fn download_dir_rejects_empty() {
        let err = resolve_download_dir(std::path::Path::new("/data"), "").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field: "download_dir", .. }));
    }

    #[test]
    fn download_dir_rejects_escape() {
        let err = resolve_download_dir(std::path::Path::new("/data/work"), "../../etc").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field: "download_dir", .. }));
    }

    #[test]
    fn download_dir_accepts_relative_under_workdir() {
        let resolved = resolve_download_dir(std::path::Path::new("/data/work"), "downloads").unwrap();
        assert_eq!(resolved, std::path::PathBuf::from("/data/work/downloads"));
    }

    #[test]
    fn site_auth_cookie_requires_cookie_and_rejects_api_key() {
        validate_site_auth("cookie", Some("sess=1"), None, None).unwrap();
        let err = validate_site_auth("cookie", Some("sess=1"), Some("abc"), None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field: "api_key", .. }));
    }

    #[test]
    fn site_auth_rejects_unknown_method() {
        let err = validate_site_auth("oauth", None, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field: "auth_method", .. }));
    }

    #[test]
    fn site_id_rejects_uppercase_and_leading_digit() {
        assert!(validate_site_id("abc-1").is_ok());
        assert!(validate_site_id("Abc").is_err());
        assert!(validate_site_id("1abc").is_err());
        assert!(validate_site_id("").is_err());
    }
}
