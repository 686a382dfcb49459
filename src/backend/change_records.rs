//! Decoding of `FILE_NOTIFY_INFORMATION` record chains
//!
//! `ReadDirectoryChangesW` fills a buffer with variable-length records linked
//! by a byte offset to the next one. Parsing works on plain bytes so it can be
//! exercised on every platform; only the overlapped backend feeds it real
//! buffers.

#![cfg_attr(not(windows), allow(dead_code))]

use std::path::Path;

use tracing::trace;

use crate::path;
use crate::watcher::event::{Notification, WatchAction, WatchFlags};
use crate::watcher::id::WatchId;

pub(crate) const FILE_ACTION_ADDED: u32 = 0x1;
pub(crate) const FILE_ACTION_REMOVED: u32 = 0x2;
pub(crate) const FILE_ACTION_MODIFIED: u32 = 0x3;
pub(crate) const FILE_ACTION_RENAMED_OLD_NAME: u32 = 0x4;
pub(crate) const FILE_ACTION_RENAMED_NEW_NAME: u32 = 0x5;

/// NextEntryOffset, Action, FileNameLength
const HEADER_LEN: usize = 12;

/// One native record: action code plus the name relative to the watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChangeRecord {
    pub action: u32,
    pub name: String,
}

/// Walk a record chain.
///
/// Stops at the last record (offset 0) or at the first record that would read
/// past the end of `buf`; a truncated tail is dropped rather than trusted.
pub(crate) fn parse_records(buf: &[u8]) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    loop {
        let Some(header) = buf.get(offset..offset + HEADER_LEN) else {
            break;
        };
        let next = read_u32(&header[0..4]) as usize;
        let action = read_u32(&header[4..8]);
        let name_len = read_u32(&header[8..12]) as usize;

        let name_start = offset + HEADER_LEN;
        let Some(name_bytes) = buf.get(name_start..name_start + name_len) else {
            break;
        };
        let units: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let name = path::normalize_slashes(&String::from_utf16_lossy(&units));
        records.push(ChangeRecord { action, name });

        if next == 0 {
            break;
        }
        offset += next;
    }
    records
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// What a metadata lookup reports about a changed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryInfo {
    pub is_dir: bool,
    /// Last write time in whole seconds
    pub modified_secs: u64,
}

/// Stat an absolute path for [`ChangeDecoder::decode`]
pub(crate) fn lookup_entry(path: &Path) -> Option<EntryInfo> {
    let meta = std::fs::metadata(path).ok()?;
    let modified_secs = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Some(EntryInfo {
        is_dir: meta.is_dir(),
        modified_secs,
    })
}

/// A MOVE whose subject is a directory, for root rewriting
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirectoryMove {
    pub old_path: String,
    pub new_path: String,
}

/// Per-watch decoding state carried across reads
#[derive(Debug, Default)]
pub(crate) struct ChangeDecoder {
    /// Name from a RENAMED_OLD record still waiting for its RENAMED_NEW
    old_name: Option<String>,
    /// Last MODIFY path and its mtime
    last_modified: Option<(String, u64)>,
}

impl ChangeDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Turn native records into notifications for watch `id`.
    ///
    /// `lookup` is asked about every surviving entry except removals and the
    /// old side of a rename; an entry it cannot find has already vanished and
    /// is dropped.
    pub(crate) fn decode(
        &mut self,
        id: WatchId,
        root_dir: &str,
        flags: WatchFlags,
        records: &[ChangeRecord],
        lookup: impl Fn(&Path) -> Option<EntryInfo>,
    ) -> (Vec<Notification>, Vec<DirectoryMove>) {
        let mut out = Vec::new();
        let mut moved_dirs = Vec::new();

        for record in records {
            trace!(root = root_dir, action = record.action, name = %record.name, "raw change record");

            let needs_stat = !matches!(
                record.action,
                FILE_ACTION_REMOVED | FILE_ACTION_RENAMED_OLD_NAME
            );
            let info = if needs_stat {
                let full = path::join(root_dir, &record.name);
                match lookup(Path::new(&full)) {
                    Some(info) => Some(info),
                    None => continue,
                }
            } else {
                None
            };
            let is_dir = info.is_some_and(|i| i.is_dir);

            if is_dir && flags.contains(WatchFlags::IGNORE_DIRECTORIES) {
                continue;
            }

            match record.action {
                FILE_ACTION_RENAMED_OLD_NAME => {
                    self.old_name = Some(record.name.clone());
                }
                FILE_ACTION_RENAMED_NEW_NAME => match self.old_name.take() {
                    Some(old) => {
                        if is_dir {
                            moved_dirs.push(DirectoryMove {
                                old_path: old.clone(),
                                new_path: record.name.clone(),
                            });
                        }
                        out.push(Notification::moved(id, old, record.name.clone()));
                    }
                    None => out.push(Notification::new(id, WatchAction::Create, &record.name)),
                },
                FILE_ACTION_ADDED => {
                    out.push(Notification::new(id, WatchAction::Create, &record.name));
                }
                FILE_ACTION_REMOVED => {
                    out.push(Notification::new(id, WatchAction::Delete, &record.name));
                }
                FILE_ACTION_MODIFIED => {
                    let stamp = info.map_or(0, |i| i.modified_secs);
                    let repeat = self
                        .last_modified
                        .as_ref()
                        .is_some_and(|(p, t)| *p == record.name && *t == stamp);
                    if repeat {
                        continue;
                    }
                    self.last_modified = Some((record.name.clone(), stamp));
                    out.push(Notification::new(id, WatchAction::Modify, &record.name));
                }
                _ => {}
            }
        }
        (out, moved_dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wid() -> WatchId {
        WatchId::new(0, 0)
    }

    /// Build a record chain the way the OS lays it out (DWORD aligned)
    fn chain(records: &[(u32, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, (action, name)) in records.iter().enumerate() {
            let name: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
            let mut len = HEADER_LEN + name.len();
            len += (4 - len % 4) % 4;
            let next = if i + 1 == records.len() { 0 } else { len as u32 };

            let start = buf.len();
            buf.extend_from_slice(&next.to_le_bytes());
            buf.extend_from_slice(&action.to_le_bytes());
            buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
            buf.extend_from_slice(&name);
            buf.resize(start + len, 0);
        }
        buf
    }

    fn file(_: &Path) -> Option<EntryInfo> {
        Some(EntryInfo {
            is_dir: false,
            modified_secs: 7,
        })
    }

    fn dir(_: &Path) -> Option<EntryInfo> {
        Some(EntryInfo {
            is_dir: true,
            modified_secs: 7,
        })
    }

    fn render(notes: &[Notification]) -> Vec<String> {
        notes
            .iter()
            .map(|n| match &n.old_path {
                Some(old) => format!("{} {} -> {}", n.action, old, n.path),
                None => format!("{} {}", n.action, n.path),
            })
            .collect()
    }

    #[test]
    fn test_parse_chain() {
        let buf = chain(&[(FILE_ACTION_ADDED, "a.txt"), (FILE_ACTION_REMOVED, r"sub\b.txt")]);
        let records = parse_records(&buf);
        assert_eq!(
            records,
            vec![
                ChangeRecord {
                    action: FILE_ACTION_ADDED,
                    name: "a.txt".into()
                },
                ChangeRecord {
                    action: FILE_ACTION_REMOVED,
                    name: "sub/b.txt".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_truncated_tail_is_dropped() {
        let mut buf = chain(&[(FILE_ACTION_ADDED, "a"), (FILE_ACTION_ADDED, "bbbbbbbb")]);
        buf.truncate(buf.len() - 4);
        assert_eq!(parse_records(&buf).len(), 1);
        assert!(parse_records(&[0u8; 5]).is_empty());
    }

    #[test]
    fn test_parse_non_ascii_name() {
        let buf = chain(&[(FILE_ACTION_MODIFIED, "résumé.txt")]);
        assert_eq!(parse_records(&buf)[0].name, "résumé.txt");
    }

    #[test]
    fn test_decode_basic_actions() {
        let records = parse_records(&chain(&[
            (FILE_ACTION_ADDED, "new"),
            (FILE_ACTION_REMOVED, "gone"),
            (FILE_ACTION_MODIFIED, "changed"),
            (0x99, "unknown"),
        ]));
        let (out, moved) =
            ChangeDecoder::new().decode(wid(), "C:/w/", WatchFlags::empty(), &records, file);
        assert_eq!(render(&out), vec!["CREATE new", "DELETE gone", "MODIFY changed"]);
        assert!(moved.is_empty());
    }

    #[test]
    fn test_decode_rename_pair() {
        let records = parse_records(&chain(&[
            (FILE_ACTION_RENAMED_OLD_NAME, "old"),
            (FILE_ACTION_RENAMED_NEW_NAME, "new"),
        ]));
        let (out, _) = ChangeDecoder::new().decode(wid(), "C:/w/", WatchFlags::empty(), &records, file);
        assert_eq!(render(&out), vec!["MOVE old -> new"]);
    }

    #[test]
    fn test_rename_old_name_survives_across_reads() {
        let mut decoder = ChangeDecoder::new();
        let first = parse_records(&chain(&[(FILE_ACTION_RENAMED_OLD_NAME, "old")]));
        let second = parse_records(&chain(&[(FILE_ACTION_RENAMED_NEW_NAME, "new")]));

        let (out, _) = decoder.decode(wid(), "C:/w/", WatchFlags::empty(), &first, file);
        assert!(out.is_empty());
        let (out, _) = decoder.decode(wid(), "C:/w/", WatchFlags::empty(), &second, file);
        assert_eq!(render(&out), vec!["MOVE old -> new"]);
    }

    #[test]
    fn test_rename_new_without_old_is_create() {
        let records = parse_records(&chain(&[(FILE_ACTION_RENAMED_NEW_NAME, "new")]));
        let (out, _) = ChangeDecoder::new().decode(wid(), "C:/w/", WatchFlags::empty(), &records, file);
        assert_eq!(render(&out), vec!["CREATE new"]);
    }

    #[test]
    fn test_duplicate_modify_collapsed() {
        let records = parse_records(&chain(&[
            (FILE_ACTION_MODIFIED, "f"),
            (FILE_ACTION_MODIFIED, "f"),
            (FILE_ACTION_MODIFIED, "g"),
            (FILE_ACTION_MODIFIED, "f"),
        ]));
        let (out, _) = ChangeDecoder::new().decode(wid(), "C:/w/", WatchFlags::empty(), &records, file);
        assert_eq!(render(&out), vec!["MODIFY f", "MODIFY g", "MODIFY f"]);
    }

    #[test]
    fn test_vanished_entry_dropped() {
        let records = parse_records(&chain(&[
            (FILE_ACTION_ADDED, "flash"),
            (FILE_ACTION_REMOVED, "flash"),
        ]));
        let (out, _) =
            ChangeDecoder::new().decode(wid(), "C:/w/", WatchFlags::empty(), &records, |_| None);
        assert_eq!(render(&out), vec!["DELETE flash"]);
    }

    #[test]
    fn test_ignore_directories() {
        let records = parse_records(&chain(&[(FILE_ACTION_ADDED, "sub")]));
        let (out, _) = ChangeDecoder::new().decode(
            wid(),
            "C:/w/",
            WatchFlags::IGNORE_DIRECTORIES,
            &records,
            dir,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_directory_move_is_reported() {
        let records = parse_records(&chain(&[
            (FILE_ACTION_RENAMED_OLD_NAME, "a"),
            (FILE_ACTION_RENAMED_NEW_NAME, "b"),
        ]));
        let (_, moved) =
            ChangeDecoder::new().decode(wid(), "C:/w/", WatchFlags::RECURSIVE, &records, dir);
        assert_eq!(
            moved,
            vec![DirectoryMove {
                old_path: "a".into(),
                new_path: "b".into()
            }]
        );
    }

    #[test]
    fn test_lookup_entry_on_real_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), "x").unwrap();
        assert_eq!(lookup_entry(&dir.path().join("f")).map(|i| i.is_dir), Some(false));
        assert_eq!(lookup_entry(dir.path()).map(|i| i.is_dir), Some(true));
        assert!(lookup_entry(&dir.path().join("missing")).is_none());
    }
}
