//! USTAR parsing and encoding.
//!
//! Content is addressed as `(tar, offset, length)` triples until an extract
//! is required: [`TarFile::parse`] does not copy file bytes out of the
//! backing buffer, it slices `bytes::Bytes`, which shares the underlying
//! allocation and only bumps a refcount.

use bytes::Bytes;

use crate::error::LayerError;

const BLOCK_SIZE: usize = 512;
const NAME_LEN: usize = 100;
const MODE_OFF: usize = 100;
const SIZE_OFF: usize = 124;
const MTIME_OFF: usize = 136;
const CHKSUM_OFF: usize = 148;
const TYPEFLAG_OFF: usize = 156;
const MAGIC_OFF: usize = 257;

const TYPE_REGULAR: u8 = b'0';
const TYPE_REGULAR_ALT: u8 = 0;
const TYPE_DIR: u8 = b'5';
const TYPE_GNU_LONGNAME: u8 = b'L';

/// What kind of filesystem object an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single filesystem entry: metadata plus its content, shared
/// (zero-copy) with whichever [`TarFile`] it was parsed out of.
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub path: String,
    pub mode: u32,
    pub mtime: u64,
    pub kind: EntryKind,
    pub content: Bytes,
}

/// A parsed tar archive: the original bytes plus the entries sliced out of
/// them.
#[derive(Debug, Clone)]
pub struct TarFile {
    entries: Vec<TarEntry>,
}

impl TarFile {
    /// Parses a USTAR archive. Recognizes GNU long-name extension records
    /// and directory records.
    pub fn parse(bytes: Bytes) -> Result<Self, LayerError> {
        Self::parse_named(bytes, "<layer>")
    }

    pub fn parse_named(bytes: Bytes, layer_name: &str) -> Result<Self, LayerError> {
        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut pending_long_name: Option<String> = None;

        while offset + BLOCK_SIZE <= bytes.len() {
            let block = &bytes[offset..offset + BLOCK_SIZE];
            if block.iter().all(|&b| b == 0) {
                // Two consecutive zero blocks mark end-of-archive.
                break;
            }

            let name_field = parse_cstr(&block[0..NAME_LEN]);
            let mode = parse_octal(&block[MODE_OFF..MODE_OFF + 8]).ok_or_else(|| {
                LayerError::Parse {
                    layer: layer_name.to_string(),
                    reason: format!("bad mode field at offset {offset}"),
                }
            })?;
            let size = parse_octal(&block[SIZE_OFF..SIZE_OFF + 12]).ok_or_else(|| {
                LayerError::Parse {
                    layer: layer_name.to_string(),
                    reason: format!("bad size field at offset {offset}"),
                }
            })? as usize;
            let mtime = parse_octal(&block[MTIME_OFF..MTIME_OFF + 12]).ok_or_else(|| {
                LayerError::Parse {
                    layer: layer_name.to_string(),
                    reason: format!("bad mtime field at offset {offset}"),
                }
            })?;
            let typeflag = block[TYPEFLAG_OFF];
            let _ = &block[CHKSUM_OFF..CHKSUM_OFF + 8]; // checksum not re-verified
            let _ = &block[MAGIC_OFF..MAGIC_OFF + 6]; // "ustar" magic, not required to match

            let content_start = offset + BLOCK_SIZE;
            let padded = size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
            if content_start + padded > bytes.len() {
                return Err(LayerError::Parse {
                    layer: layer_name.to_string(),
                    reason: format!("truncated archive at offset {offset}"),
                });
            }

            if typeflag == TYPE_GNU_LONGNAME {
                let raw = bytes.slice(content_start..content_start + size);
                pending_long_name = Some(parse_cstr(&raw));
                offset = content_start + padded;
                continue;
            }

            let path = pending_long_name.take().unwrap_or(name_field);
            let kind = if typeflag == TYPE_DIR {
                EntryKind::Directory
            } else if typeflag == TYPE_REGULAR || typeflag == TYPE_REGULAR_ALT {
                EntryKind::File
            } else {
                // Unsupported type (symlink, device node, ...): skip its
                // content but don't fail the whole archive.
                offset = content_start + padded;
                continue;
            };

            let content = if kind == EntryKind::File {
                bytes.slice(content_start..content_start + size)
            } else {
                Bytes::new()
            };

            entries.push(TarEntry {
                path,
                mode,
                mtime,
                kind,
                content,
            });
            offset = content_start + padded;
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TarEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TarEntry> {
        self.entries
    }

    /// Encodes a set of entries into a new USTAR archive, in the given
    /// order, terminated by two zero blocks.
    pub fn encode(entries: &[TarEntry]) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in entries {
            encode_entry(&mut out, entry);
        }
        out.extend(std::iter::repeat_n(0u8, BLOCK_SIZE * 2));
        out
    }
}

fn encode_entry(out: &mut Vec<u8>, entry: &TarEntry) {
    let name_bytes = entry.path.as_bytes();
    if name_bytes.len() > NAME_LEN {
        // GNU long-name record: typeflag 'L', content is the full path.
        let mut header = [0u8; BLOCK_SIZE];
        header[0] = b'.';
        header[1] = b'/';
        header[2..8].copy_from_slice(b"@LongL");
        write_octal(&mut header[MODE_OFF..MODE_OFF + 8], 0);
        write_octal(&mut header[SIZE_OFF..SIZE_OFF + 12], name_bytes.len() as u64);
        write_octal(&mut header[MTIME_OFF..MTIME_OFF + 12], 0);
        header[TYPEFLAG_OFF] = TYPE_GNU_LONGNAME;
        header[MAGIC_OFF..MAGIC_OFF + 6].copy_from_slice(b"ustar\0");
        write_checksum(&mut header);
        out.extend_from_slice(&header);
        out.extend_from_slice(name_bytes);
        pad_to_block(out, name_bytes.len());
    }

    let mut header = [0u8; BLOCK_SIZE];
    let truncated_len = name_bytes.len().min(NAME_LEN);
    header[0..truncated_len].copy_from_slice(&name_bytes[..truncated_len]);
    write_octal(&mut header[MODE_OFF..MODE_OFF + 8], entry.mode as u64);
    let size = if entry.kind == EntryKind::File {
        entry.content.len() as u64
    } else {
        0
    };
    write_octal(&mut header[SIZE_OFF..SIZE_OFF + 12], size);
    write_octal(&mut header[MTIME_OFF..MTIME_OFF + 12], entry.mtime);
    header[TYPEFLAG_OFF] = match entry.kind {
        EntryKind::File => TYPE_REGULAR,
        EntryKind::Directory => TYPE_DIR,
    };
    header[MAGIC_OFF..MAGIC_OFF + 6].copy_from_slice(b"ustar\0");
    write_checksum(&mut header);
    out.extend_from_slice(&header);

    if entry.kind == EntryKind::File {
        out.extend_from_slice(&entry.content);
        pad_to_block(out, entry.content.len());
    }
}

fn pad_to_block(out: &mut Vec<u8>, written: usize) {
    let padding = written.div_ceil(BLOCK_SIZE) * BLOCK_SIZE - written;
    out.extend(std::iter::repeat_n(0u8, padding));
}

fn write_octal(field: &mut [u8], value: u64) {
    let width = field.len() - 1;
    let s = format!("{value:0width$o}", width = width);
    let bytes = s.as_bytes();
    let start = field.len() - 1 - bytes.len();
    field[start..start + bytes.len()].copy_from_slice(bytes);
    field[field.len() - 1] = 0;
}

fn write_checksum(header: &mut [u8; BLOCK_SIZE]) {
    header[CHKSUM_OFF..CHKSUM_OFF + 8].copy_from_slice(&[b' '; 8]);
    let sum: u32 = header.iter().map(|&b| b as u32).sum();
    let s = format!("{sum:06o}\0 ");
    header[CHKSUM_OFF..CHKSUM_OFF + 8].copy_from_slice(s.as_bytes());
}

fn parse_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim_end().to_string()
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let text = parse_cstr(field);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(trimmed, 8).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &[u8]) -> TarEntry {
        TarEntry {
            path: path.to_string(),
            mode: 0o644,
            mtime: 1_700_000_000,
            kind: EntryKind::File,
            content: Bytes::copy_from_slice(content),
        }
    }

    #[test]
    fn encode_parse_round_trip() {
        let entries = vec![file("root/a.txt", b"hello"), file("root/b.txt", b"world")];
        let bytes = Bytes::from(TarFile::encode(&entries));
        let parsed = TarFile::parse(bytes).unwrap();
        assert_eq!(parsed.entries().len(), 2);
        assert_eq!(parsed.entries()[0].path, "root/a.txt");
        assert_eq!(&parsed.entries()[0].content[..], b"hello");
        assert_eq!(parsed.entries()[1].path, "root/b.txt");
    }

    #[test]
    fn long_names_round_trip() {
        let long_path = "a/".repeat(60) + "file.txt";
        let entries = vec![file(&long_path, b"x")];
        let bytes = Bytes::from(TarFile::encode(&entries));
        let parsed = TarFile::parse(bytes).unwrap();
        assert_eq!(parsed.entries()[0].path, long_path);
    }

    #[test]
    fn directories_have_no_content() {
        let dir = TarEntry {
            path: "root/".to_string(),
            mode: 0o755,
            mtime: 0,
            kind: EntryKind::Directory,
            content: Bytes::new(),
        };
        let bytes = Bytes::from(TarFile::encode(&[dir]));
        let parsed = TarFile::parse(bytes).unwrap();
        assert_eq!(parsed.entries()[0].kind, EntryKind::Directory);
        assert!(parsed.entries()[0].content.is_empty());
    }

    #[test]
    fn truncated_archive_is_rejected() {
        let entries = vec![file("a.txt", b"hello world this is more than one block of data")];
        let mut bytes = TarFile::encode(&entries);
        bytes.truncate(bytes.len() - 100);
        let result = TarFile::parse_named(Bytes::from(bytes), "layer1");
        assert!(matches!(result, Err(LayerError::Parse { layer, .. }) if layer == "layer1"));
    }
}
