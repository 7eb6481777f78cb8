//! Shell command strings understood by the backend. Paths are absolute
//! from the project root (`/src/main.rs`) and sent relative to the backend
//! working directory (`./src/main.rs`). Every path and content argument goes
//! through [`raw_string`], names coming from a listing may contain quotes.

fn remote(path: &str) -> String {
    let path = if path.starts_with('/') {
        format!(".{}", path)
    } else {
        format!("./{}", path)
    };
    raw_string(&path)
}

/// Lists a directory as a json array of `{name, type, ..}` records.
pub fn list_dir(dir: &str) -> String {
    format!("cd {} ; ls -a | to json", remote(dir))
}

pub fn path_exists(path: &str) -> String {
    format!("{} | path exists", remote(path))
}

pub fn mkdir(path: &str) -> String {
    format!("mkdir {}", remote(path))
}

/// Creates an empty file, and any missing parent directories.
pub fn create_file(path: &str) -> String {
    save_file(path, "", false)
}

pub fn save_file(path: &str, content: &str, force: bool) -> String {
    let path = remote(path);
    format!(
        "mkdir ({path} | path dirname) ; {} | save {}{path}",
        raw_string(content),
        if force { "-f " } else { "" },
    )
}

pub fn move_path(from: &str, to: &str) -> String {
    format!("mv -f {} {}", remote(from), remote(to))
}

pub fn remove(path: &str) -> String {
    format!("rm -rf {}", remote(path))
}

pub fn read_file(path: &str) -> String {
    format!("open {} -r", remote(path))
}

/// Quotes `content` so the shell takes it verbatim. Plain single quotes
/// when possible, otherwise a raw string with enough `#` to not be closed
/// early by the content.
pub fn raw_string(content: &str) -> String {
    if !content.contains('\'') {
        return format!("'{}'", content);
    }

    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '#' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    let hashes = "#".repeat(longest + 1);
    format!("r{hashes}'{content}'{hashes}")
}

/// Parses the output of [`path_exists`].
pub fn parse_exists(output: &str) -> Option<bool> {
    match output.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(list_dir("/"), "cd './' ; ls -a | to json");
        assert_eq!(list_dir("/src"), "cd './src' ; ls -a | to json");
        assert_eq!(path_exists("/a b"), "'./a b' | path exists");
        assert_eq!(mkdir("/d"), "mkdir './d'");
        assert_eq!(
            create_file("/d/f.txt"),
            "mkdir ('./d/f.txt' | path dirname) ; '' | save './d/f.txt'"
        );
        assert_eq!(move_path("/a", "/b/a"), "mv -f './a' './b/a'");
        assert_eq!(remove("/a"), "rm -rf './a'");
        assert_eq!(read_file("/a.rs"), "open './a.rs' -r");
    }

    #[test]
    fn test_quotes_in_names_stay_inside_one_argument() {
        assert_eq!(remove("/x' '."), "rm -rf r#'./x' '.'#");
        assert_eq!(
            move_path("/it's", "/b/it's"),
            "mv -f r#'./it's'# r#'./b/it's'#"
        );
        assert_eq!(path_exists("/a'#b"), "r##'./a'#b'## | path exists");
    }

    #[test]
    fn test_save_force() {
        assert_eq!(
            save_file("/f", "x", true),
            "mkdir ('./f' | path dirname) ; 'x' | save -f './f'"
        );
    }

    #[test]
    fn test_raw_string() {
        assert_eq!(raw_string("plain"), "'plain'");
        assert_eq!(raw_string("it's"), "r#'it's'#");
        assert_eq!(raw_string("'## x '#"), "r###''## x '#'###");
    }

    #[test]
    fn test_parse_exists() {
        assert_eq!(parse_exists("true\n"), Some(true));
        assert_eq!(parse_exists("false"), Some(false));
        assert_eq!(parse_exists("Error: nope"), None);
    }
}
