//! Environment and shell selection for spawned terminals.
//!
//! The server may run under a service manager with an almost empty
//! environment, so the basics a login shell expects are filled in when
//! missing.

use std::collections::BTreeMap;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";
const DEFAULT_TERM: &str = "xterm-256color";
const DEFAULT_LANG: &str = "en_US.UTF-8";
const FALLBACK_SHELL: &str = "/bin/sh";

/// Copy `vars` and add PATH, HOME, TERM and LANG when absent or empty.
pub fn sanitized_env<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = vars.into_iter().collect();

    fill(&mut env, "PATH", || DEFAULT_PATH.to_string());
    fill(&mut env, "HOME", || {
        dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string())
    });
    fill(&mut env, "TERM", || DEFAULT_TERM.to_string());
    fill(&mut env, "LANG", || DEFAULT_LANG.to_string());
    env.insert("COLORTERM".to_string(), "truecolor".to_string());

    env
}

fn fill(env: &mut BTreeMap<String, String>, key: &str, default: impl FnOnce() -> String) {
    let missing = env.get(key).map_or(true, |v| v.is_empty());
    if missing {
        env.insert(key.to_string(), default());
    }
}

/// Configured shell, then `$SHELL` from `env`, then `/bin/sh`.
pub fn resolve_shell(configured: Option<&str>, env: &BTreeMap<String, String>) -> String {
    configured
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| env.get("SHELL").filter(|s| !s.is_empty()).cloned())
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_environment_gets_defaults() {
        let env = sanitized_env(Vec::new());
        assert_eq!(env.get("PATH").map(String::as_str), Some(DEFAULT_PATH));
        assert_eq!(env.get("TERM").map(String::as_str), Some(DEFAULT_TERM));
        assert_eq!(env.get("LANG").map(String::as_str), Some(DEFAULT_LANG));
        assert!(env.get("HOME").is_some_and(|h| !h.is_empty()));
    }

    #[test]
    fn existing_values_are_kept() {
        let env = sanitized_env(vec![
            ("PATH".to_string(), "/opt/bin".to_string()),
            ("TERM".to_string(), "screen".to_string()),
            ("EDITOR".to_string(), "vi".to_string()),
        ]);
        assert_eq!(env["PATH"], "/opt/bin");
        assert_eq!(env["TERM"], "screen");
        assert_eq!(env["EDITOR"], "vi");
    }

    #[test]
    fn blank_values_count_as_missing() {
        let env = sanitized_env(vec![("LANG".to_string(), String::new())]);
        assert_eq!(env["LANG"], DEFAULT_LANG);
    }

    #[test]
    fn shell_resolution_order() {
        let mut env = BTreeMap::new();
        assert_eq!(resolve_shell(None, &env), "/bin/sh");

        env.insert("SHELL".to_string(), "/bin/bash".to_string());
        assert_eq!(resolve_shell(None, &env), "/bin/bash");
        assert_eq!(resolve_shell(Some("/bin/zsh"), &env), "/bin/zsh");
        assert_eq!(resolve_shell(Some(""), &env), "/bin/bash");
    }
}
