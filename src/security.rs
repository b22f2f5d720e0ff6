//! Secret masking and workspace path guards shared by tools and logging

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Path fragments no tool may touch, wherever the workspace is
const BLOCKED_PATHS: &[&str] = &["/etc/shadow", "/etc/passwd", ".ssh/id_", ".env", ".git/config"];

const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "secret",
    "password",
    "passwd",
    "token",
    "credential",
    "private_key",
    "authorization",
];

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"sk-[A-Za-z0-9_\-]{8,}", "sk-***"),
            (r"(?i)bearer\s+[A-Za-z0-9_\-\.=]+", "Bearer ***"),
            (
                r#"(?i)((?:api[_-]?key|password|passwd|secret|token)["']?\s*[:=]\s*["']?)[^\s"',}]+"#,
                "${1}***",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Replace API keys, bearer tokens and credential assignments with `***`
pub fn mask_sensitive(text: &str) -> String {
    secret_patterns()
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// Whether a config or header key names a secret
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Lexically normalize a path (resolve `.` and `..` without touching disk)
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve a tool-supplied path against the workspace.
///
/// Relative paths are joined onto `workspace`. The result must stay inside the
/// workspace and must not match a blocked path.
pub fn resolve_workspace_path(workspace: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    let joined = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        workspace.join(requested_path)
    };
    let resolved = normalize(&joined);

    let display = resolved.to_string_lossy().replace('\\', "/");
    if let Some(blocked) = BLOCKED_PATHS.iter().find(|b| display.contains(*b)) {
        return Err(format!("Access to '{}' is blocked ({})", requested, blocked));
    }

    let root = normalize(workspace);
    if !resolved.starts_with(&root) {
        return Err(format!(
            "Path '{}' is outside the workspace {}",
            requested,
            root.display()
        ));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        let masked = mask_sensitive("key sk-abcdefghijklmnop and Authorization: Bearer abc.def");
        assert!(!masked.contains("abcdefghijklmnop"));
        assert!(masked.contains("sk-***"));
        assert!(masked.contains("Bearer ***"));

        let masked = mask_sensitive(r#"{"api_key": "hunter2", "password=swordfish"}"#);
        assert!(!masked.contains("hunter2"));
        assert!(!masked.contains("swordfish"));
    }

    #[test]
    fn test_is_sensitive_key() {
        assert!(is_sensitive_key("OPENAI_API_KEY"));
        assert!(is_sensitive_key("db_password"));
        assert!(!is_sensitive_key("model"));
    }

    #[test]
    fn test_resolve_workspace_path() {
        let ws = Path::new("/work/space");
        assert_eq!(
            resolve_workspace_path(ws, "notes/a.txt").unwrap(),
            PathBuf::from("/work/space/notes/a.txt")
        );
        assert!(resolve_workspace_path(ws, "../escape.txt").is_err());
        assert!(resolve_workspace_path(ws, "/etc/passwd").is_err());
        assert!(resolve_workspace_path(ws, ".env").is_err());
        assert!(resolve_workspace_path(ws, "repo/.git/config").is_err());
        assert!(resolve_workspace_path(ws, "./a/../b.txt").is_ok());
    }
}
