//! Paths are absolute from the project root, `/` separated, with no
//! trailing separator. The root itself is `/`.

use super::TreeError;

pub const ROOT: &str = "/";

pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let parts: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if parts.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

pub fn join(parent: &str, name: &str) -> String {
    normalize(&format!("{}/{}", parent, name))
}

pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(i) => path[..i].to_string(),
    }
}

/// Last component, empty for the root.
pub fn basename(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(i) => path[i + 1..].to_string(),
        None => path,
    }
}

/// A single path component that survives being single quoted in a command.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\'', '"', '\0'])
}

/// `path` is `ancestor` or somewhere below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let path = normalize(path);
    let ancestor = normalize(ancestor);
    ancestor == ROOT || path == ancestor || path.starts_with(&format!("{}/", ancestor))
}

/// A directory cannot be moved into itself or anything below it.
pub fn check_move(from: &str, into: &str) -> Result<(), TreeError> {
    if is_within(into, from) {
        Err(TreeError::MoveIntoItself {
            from: normalize(from),
            into: normalize(into),
        })
    } else {
        Ok(())
    }
}
