use colored::Colorize;
use wss_client::tree::Entry;

/// One line per entry, indented by depth. Directories get a trailing `/`
/// and a marker telling whether they are open.
pub fn render(entries: &[Entry], color: bool) -> String {
    let mut out = String::new();
    for e in entries {
        let indent = "  ".repeat(e.depth);
        let line = if e.is_dir() {
            let marker = if e.open { "▾" } else { "▸" };
            let name = format!("{}/", e.name);
            if color {
                format!("{}{} {}", indent, marker, name.blue().bold())
            } else {
                format!("{}{} {}", indent, marker, name)
            }
        } else {
            format!("{}  {}", indent, e.name)
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use wss_client::tree::EntryKind;

    fn entry(name: &str, kind: EntryKind, depth: usize, open: bool) -> Entry {
        Entry {
            name: name.to_string(),
            kind,
            depth,
            parent_path: "/".to_string(),
            open,
            placeholder: false,
        }
    }

    #[test]
    fn test_render_plain() {
        let entries = vec![
            entry("src", EntryKind::Dir, 0, true),
            entry("lib", EntryKind::Dir, 1, false),
            entry("main.rs", EntryKind::File, 1, false),
            entry("README.md", EntryKind::File, 0, false),
        ];
        assert_eq!(
            render(&entries, false),
            "▾ src/\n  ▸ lib/\n    main.rs\n  README.md\n"
        );
    }
}
