use std::collections::BTreeMap;

use crate::tree::VirtualTree;

/// Canonicalizes arbitrary path strings into the stable key space used to
/// index the virtual tree. All resolution is lexical: `..` is folded without
/// consulting the tree or the real filesystem.
///
/// `None` input yields `None` and the empty string normalizes to itself; both
/// mean "no path" to callers and are never errors.
pub fn normalize(
    path: Option<&str>,
    env: &BTreeMap<String, String>,
    home: Option<&str>,
) -> Option<String> {
    let raw = path?;
    if raw.is_empty() {
        return Some(String::new());
    }

    let expanded = expand_env_vars(raw, env);
    let expanded = expand_home(&expanded, home);
    Some(lexical_normalize(&expanded))
}

/// Expands `$VAR` and `${VAR}` tokens from the workspace environment map.
/// Unresolved variables are left verbatim in the output.
pub fn expand_env_vars(input: &str, env: &BTreeMap<String, String>) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        if i + 1 < chars.len() && chars[i + 1] == '{' {
            // ${VAR} form
            if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                let name: String = chars[i + 2..i + 2 + close].iter().collect();
                match env.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(&name);
                        out.push('}');
                    }
                }
                i += close + 3;
                continue;
            }
            out.push('$');
            i += 1;
        } else if i + 1 < chars.len() && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_') {
            // $VAR form
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let name: String = chars[i + 1..j].iter().collect();
            match env.get(&name) {
                Some(value) => out.push_str(value),
                None => {
                    out.push('$');
                    out.push_str(&name);
                }
            }
            i = j;
        } else {
            out.push('$');
            i += 1;
        }
    }

    out
}

/// Expands a leading `~` or `~user` segment. A bare `~` resolves to the
/// configured home, falling back to the OS home directory and finally to
/// `/home/user`; `~name` resolves to `/home/name`.
pub fn expand_home(input: &str, home: Option<&str>) -> String {
    if !input.starts_with('~') {
        return input.to_string();
    }

    let rest = &input[1..];
    if rest.is_empty() || rest.starts_with('/') {
        let base = home
            .map(|h| h.to_string())
            .or_else(|| dirs::home_dir().map(|p| p.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "/home/user".to_string());
        return format!("{}{}", base, rest);
    }

    // ~user form
    let (user, tail) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    format!("/home/{}{}", user, tail)
}

/// Collapses repeated separators and resolves `.`/`..` segments lexically,
/// clamping `..` at the filesystem root. The result never contains `//`.
pub fn lexical_normalize(input: &str) -> String {
    let unified = input.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if let Some(top) = stack.last() {
                    if *top == ".." {
                        stack.push("..");
                    } else {
                        stack.pop();
                    }
                } else if !absolute {
                    stack.push("..");
                }
                // ".." above an absolute root is dropped
            }
            other => stack.push(other),
        }
    }

    if absolute {
        format!("/{}", stack.join("/"))
    } else if stack.is_empty() {
        ".".to_string()
    } else {
        stack.join("/")
    }
}

/// Resolves a `cd` target against the current working directory and validates
/// it against the virtual tree. Returns `None` when the resolved path escapes
/// the workspace root or is not a directory node; callers treat `None` as
/// "cannot cd there", not as an error.
pub fn resolve_target_path_for_cd(
    target: &str,
    cwd: &str,
    workspace_root: &str,
    tree: &VirtualTree,
    env: &BTreeMap<String, String>,
) -> Option<String> {
    let expanded = expand_env_vars(target, env);
    let expanded = expand_home(&expanded, Some(workspace_root));

    let joined = if expanded.starts_with('/') {
        expanded
    } else {
        format!("{}/{}", cwd, expanded)
    };
    let resolved = lexical_normalize(&joined);

    let root = lexical_normalize(workspace_root);
    let within = resolved == root || resolved.starts_with(&format!("{}/", root)) || root == "/";
    if !within {
        return None;
    }

    match tree.get(&resolved) {
        Some(node) if node.is_directory => Some(resolved),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{FileContent, FileNode, VirtualTree};

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn none_input_yields_none() {
        assert_eq!(normalize(None, &BTreeMap::new(), None), None);
    }

    #[test]
    fn empty_string_normalizes_to_itself() {
        assert_eq!(
            normalize(Some(""), &BTreeMap::new(), None),
            Some(String::new())
        );
    }

    #[test]
    fn collapses_repeated_separators() {
        assert_eq!(lexical_normalize("/a//b///c"), "/a/b/c");
        assert_eq!(lexical_normalize("a//b/"), "a/b");
    }

    #[test]
    fn resolves_dot_and_dotdot() {
        assert_eq!(lexical_normalize("/a/./b/../c"), "/a/c");
        assert_eq!(lexical_normalize("a/.."), ".");
        assert_eq!(lexical_normalize("../a"), "../a");
    }

    #[test]
    fn dotdot_clamps_at_root() {
        assert_eq!(lexical_normalize("/../../a"), "/a");
        assert_eq!(lexical_normalize("/.."), "/");
    }

    #[test]
    fn never_contains_doubled_separator() {
        for input in ["//x//y", "/a///", "a//b//../c", "~//z", "$X//w"] {
            let out = normalize(Some(input), &env(&[("X", "/v")]), Some("/home/u")).unwrap();
            assert!(!out.contains("//"), "{:?} -> {:?}", input, out);
        }
    }

    #[test]
    fn expands_braced_and_bare_vars() {
        let e = env(&[("HOME", "/home/u"), ("PROJ", "demo")]);
        assert_eq!(expand_env_vars("$HOME/x", &e), "/home/u/x");
        assert_eq!(expand_env_vars("${PROJ}/src", &e), "demo/src");
    }

    #[test]
    fn unresolved_vars_left_verbatim() {
        let e = BTreeMap::new();
        assert_eq!(expand_env_vars("$NOPE/x", &e), "$NOPE/x");
        assert_eq!(expand_env_vars("${NOPE}/x", &e), "${NOPE}/x");
    }

    #[test]
    fn tilde_expansion() {
        assert_eq!(expand_home("~", Some("/ws")), "/ws");
        assert_eq!(expand_home("~/sub", Some("/ws")), "/ws/sub");
        assert_eq!(expand_home("~alice/sub", Some("/ws")), "/home/alice/sub");
    }

    #[test]
    fn cd_resolution_requires_directory_node() {
        let mut tree = VirtualTree::new();
        tree.insert(FileNode::directory("/ws"));
        tree.insert(FileNode::directory("/ws/sub"));
        tree.insert(FileNode::file("/ws/a.txt", FileContent::text_from_str("x"), 1));

        let e = BTreeMap::new();
        assert_eq!(
            resolve_target_path_for_cd("sub", "/ws", "/ws", &tree, &e),
            Some("/ws/sub".to_string())
        );
        assert_eq!(
            resolve_target_path_for_cd("a.txt", "/ws", "/ws", &tree, &e),
            None
        );
        assert_eq!(
            resolve_target_path_for_cd("../..", "/ws/sub", "/ws", &tree, &e),
            None
        );
        assert_eq!(
            resolve_target_path_for_cd("..", "/ws/sub", "/ws", &tree, &e),
            Some("/ws".to_string())
        );
    }
}
