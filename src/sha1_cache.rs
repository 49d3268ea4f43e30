use std::collections::HashMap;
use std::io::{BufRead as _, Write as _};
use std::sync::Mutex;

use gix_hash::ObjectId;
use sha1::Digest as _;

/// Persistent blob-transformation cache. A key identifies (file path,
/// source content hash, transformer spec); the value is the blob id the
/// transformed content hashed to in an earlier run, letting reruns skip
/// the transformer chain entirely.
///
/// File format: one `cache-key TAB blob-sha` line per entry.
pub(crate) struct Sha1Cache {
    entries: Mutex<HashMap<[u8; 20], CacheSlot>>,
}

#[derive(Copy, Clone)]
struct CacheSlot {
    blob: ObjectId,
    /// Entries not touched by the current run are dropped on save.
    used: bool,
}

pub(crate) fn cache_key(path: &[u8], source_sha1: &[u8], transform_spec: &str) -> [u8; 20] {
    let mut h = sha1::Sha1::new();
    h.update(path);
    h.update(b"\0");
    h.update(source_sha1);
    h.update(b"\0");
    h.update(transform_spec.as_bytes());
    h.finalize().into()
}

impl Sha1Cache {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn load(src: &mut dyn std::io::BufRead) -> Result<Self, std::io::Error> {
        let mut entries = HashMap::new();

        let mut line = Vec::new();
        loop {
            line.clear();
            src.read_until(b'\n', &mut line)?;
            if line.is_empty() {
                break;
            }

            let trimmed = line.strip_suffix(b"\n").unwrap_or(&line);
            if trimmed.is_empty() {
                continue;
            }

            let parsed = parse_line(trimmed);
            match parsed {
                Some((key, blob)) => {
                    entries.insert(key, CacheSlot { blob, used: false });
                }
                None => {
                    tracing::warn!(
                        "ignoring malformed sha1-map line \"{}\"",
                        trimmed.escape_ascii(),
                    );
                }
            }
        }

        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    pub(crate) fn save(&self, dest: &mut dyn std::io::Write) -> Result<(), std::io::Error> {
        let entries = self.entries.lock().unwrap();
        let mut lines = entries
            .iter()
            .filter(|(_, slot)| slot.used)
            .map(|(key, slot)| {
                let mut line = hex_bytes(key);
                line.push(b'\t');
                line.extend(slot.blob.to_string().into_bytes());
                line.push(b'\n');
                line
            })
            .collect::<Vec<_>>();
        lines.sort();

        for line in lines {
            dest.write_all(&line)?;
        }
        dest.flush()
    }

    /// Marks a hit as used so it survives the next save.
    pub(crate) fn get(&self, key: &[u8; 20]) -> Option<ObjectId> {
        let mut entries = self.entries.lock().unwrap();
        entries.get_mut(key).map(|slot| {
            slot.used = true;
            slot.blob
        })
    }

    /// First insert wins; a later differing value for the same key is a
    /// determinism violation and panics.
    pub(crate) fn insert(&self, key: [u8; 20], blob: ObjectId) {
        let mut entries = self.entries.lock().unwrap();
        let slot = entries.entry(key).or_insert(CacheSlot { blob, used: true });
        assert_eq!(slot.blob, blob, "conflicting sha1-map entries for one key");
        slot.used = true;
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

fn parse_line(line: &[u8]) -> Option<([u8; 20], ObjectId)> {
    let tab = line.iter().position(|&c| c == b'\t')?;
    let key = parse_hex20(&line[..tab])?;
    let blob = ObjectId::from_hex(&line[(tab + 1)..]).ok()?;
    Some((key, blob))
}

fn parse_hex20(s: &[u8]) -> Option<[u8; 20]> {
    if s.len() != 40 {
        return None;
    }
    let mut out = [0u8; 20];
    for (i, pair) in s.chunks_exact(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out[i] = ((hi << 4) | lo) as u8;
    }
    Some(out)
}

fn hex_bytes(data: &[u8]) -> Vec<u8> {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = Vec::with_capacity(data.len() * 2);
    for &byte in data {
        out.push(DIGITS[usize::from(byte >> 4)]);
        out.push(DIGITS[usize::from(byte & 0xF)]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{cache_key, Sha1Cache};
    use gix_hash::ObjectId;

    fn blob(marker: u8) -> ObjectId {
        let mut raw = [0u8; 20];
        raw[19] = marker;
        ObjectId::from_bytes_or_panic(&raw)
    }

    #[test]
    fn roundtrip_keeps_used_entries() {
        let cache = Sha1Cache::new();
        let key_a = cache_key(b"src/a.c", &[1; 20], "svn-keywords");
        let key_b = cache_key(b"src/b.c", &[2; 20], "svn-keywords");
        cache.insert(key_a, blob(1));
        cache.insert(key_b, blob(2));

        let mut saved = Vec::new();
        cache.save(&mut saved).unwrap();

        let reloaded = Sha1Cache::load(&mut saved.as_slice()).unwrap();
        assert_eq!(reloaded.len(), 2);

        // only key_a is touched this run
        assert_eq!(reloaded.get(&key_a), Some(blob(1)));

        let mut resaved = Vec::new();
        reloaded.save(&mut resaved).unwrap();
        let reloaded = Sha1Cache::load(&mut resaved.as_slice()).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn distinct_specs_make_distinct_keys() {
        let a = cache_key(b"f", &[0; 20], "svn-keywords");
        let b = cache_key(b"f", &[0; 20], "");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = b"not a line\n".to_vec();
        let cache = Sha1Cache::load(&mut text.as_slice()).unwrap();
        assert_eq!(cache.len(), 0);
    }
}
