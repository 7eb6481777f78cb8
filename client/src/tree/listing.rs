use itertools::Itertools;

use super::EntryKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl ListingEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Dir,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }
}

#[derive(serde::Deserialize)]
struct Record {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Parses `ls -a | to json` output. `.`, `..`, empty names and names
/// containing a separator are dropped, as are repeated names.
pub fn parse_listing(json: &str) -> Result<Vec<ListingEntry>, serde_json::Error> {
    let records: Vec<Record> = serde_json::from_str(json.trim())?;
    let mut entries: Vec<ListingEntry> = records
        .into_iter()
        .filter(|r| {
            !r.name.is_empty()
                && r.name != "."
                && r.name != ".."
                && !r.name.contains('/')
                && !r.name.contains('\\')
        })
        .map(|r| ListingEntry {
            kind: if r.kind == "dir" {
                EntryKind::Dir
            } else {
                EntryKind::File
            },
            name: r.name,
        })
        .unique_by(|e| e.name.clone())
        .collect();
    sort_listing(&mut entries);
    Ok(entries)
}

/// Directories first, then by name, case-sensitively.
pub fn sort_listing(entries: &mut [ListingEntry]) {
    entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
}
