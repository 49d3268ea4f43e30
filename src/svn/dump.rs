use std::collections::{HashMap, HashSet};
use std::io::Read as _;

use md5::Digest as _;

// SVN dump file format described in
// https://svn.apache.org/repos/asf/subversion/trunk/notes/dump-load-format.txt

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum DumpVersion {
    Two,
    Three,
}

impl DumpVersion {
    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"2" => Some(Self::Two),
            b"3" => Some(Self::Three),
            _ => None,
        }
    }

    fn allows_deltas(self) -> bool {
        matches!(self, Self::Three)
    }
}

pub(crate) enum Record {
    Uuid(uuid::Uuid),
    Rev(RevRecord),
    Node(NodeRecord),
}

pub(crate) struct RevRecord {
    pub(crate) rev: u64,
    pub(crate) properties: HashMap<Vec<u8>, Vec<u8>>,
}

pub(crate) struct NodeRecord {
    pub(crate) path: Vec<u8>,
    pub(crate) kind: Option<NodeKind>,
    pub(crate) action: NodeAction,
    pub(crate) copy_from: Option<NodeCopyFrom>,
    pub(crate) properties: Option<NodeProperties>,
    pub(crate) text: Option<NodeText>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeAction {
    Change,
    Add,
    Delete,
    Replace,
}

impl NodeAction {
    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"change" => Some(Self::Change),
            b"add" => Some(Self::Add),
            b"delete" => Some(Self::Delete),
            b"replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    File,
    Dir,
}

impl NodeKind {
    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"file" => Some(Self::File),
            b"dir" => Some(Self::Dir),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct NodeCopyFrom {
    pub(crate) rev: u64,
    pub(crate) path: Vec<u8>,
    pub(crate) source_md5: Option<[u8; 16]>,
    pub(crate) source_sha1: Option<[u8; 20]>,
}

#[derive(Debug)]
pub(crate) struct NodeProperties {
    pub(crate) is_delta: bool,
    /// `None` values are property deletions (delta mode only).
    pub(crate) properties: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

/// Text content announced by a node header. The bytes themselves stay in
/// the stream until [`DumpReader::take_text`] drains them.
pub(crate) struct NodeText {
    pub(crate) is_delta: bool,
    pub(crate) length: u64,
    pub(crate) md5: Option<[u8; 16]>,
    pub(crate) sha1: Option<[u8; 20]>,
    pub(crate) delta_base_md5: Option<[u8; 16]>,
    pub(crate) delta_base_sha1: Option<[u8; 20]>,
}

fn parse_bool(s: &[u8]) -> Option<bool> {
    match s {
        b"true" => Some(true),
        b"false" => Some(false),
        _ => None,
    }
}

fn parse_hex<const N: usize>(s: &[u8]) -> Option<[u8; N]> {
    if s.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    for (i, pair) in s.chunks_exact(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out[i] = ((hi << 4) | lo) as u8;
    }
    Some(out)
}

#[derive(Debug)]
pub(crate) enum DumpError {
    Io(std::io::Error),
    UnexpectedEof,
    MalformedHeader,
    InvalidVersion { version: Vec<u8> },
    MissingHeaderEntry { key: &'static [u8] },
    UnexpectedHeaderEntry { key: &'static [u8] },
    InvalidHeaderEntry { key: Vec<u8>, value: Vec<u8> },
    UnknownRecordType,
    MismatchedContentLen,
    BrokenProperties,
    RevisionRegression { rev: u64, last_rev: u64 },
    HashMismatch { path: Vec<u8>, algo: &'static str },
}

impl From<std::io::Error> for DumpError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(e)
        }
    }
}

impl std::fmt::Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Io(ref e) => write!(f, "failed to read dump: {e}"),
            Self::UnexpectedEof => write!(f, "unexpected end of dump"),
            Self::MalformedHeader => write!(f, "malformed record header"),
            Self::InvalidVersion { ref version } => {
                write!(f, "invalid dump version: \"{}\"", version.escape_ascii())
            }
            Self::MissingHeaderEntry { key } => {
                write!(f, "missing header entry: \"{}\"", key.escape_ascii())
            }
            Self::UnexpectedHeaderEntry { key } => {
                write!(f, "unexpected header entry: \"{}\"", key.escape_ascii())
            }
            Self::InvalidHeaderEntry { ref key, ref value } => write!(
                f,
                "invalid value for header entry \"{}\": \"{}\"",
                key.escape_ascii(),
                value.escape_ascii(),
            ),
            Self::UnknownRecordType => write!(f, "unknown record type"),
            Self::MismatchedContentLen => write!(f, "mismatched content length"),
            Self::BrokenProperties => write!(f, "broken property block"),
            Self::RevisionRegression { rev, last_rev } => {
                write!(f, "revision number regression: r{rev} after r{last_rev}")
            }
            Self::HashMismatch { ref path, algo } => write!(
                f,
                "declared {algo} does not match content of \"{}\"",
                path.escape_ascii(),
            ),
        }
    }
}

pub(crate) struct DumpReader<'a> {
    source: &'a mut dyn std::io::BufRead,
    version: DumpVersion,
    verify_data_hash: bool,
    last_rev: Option<u64>,
    rem_text: Option<PendingText>,
    warned_keys: HashSet<Vec<u8>>,
}

struct PendingText {
    path: Vec<u8>,
    rem_len: u64,
    verify: Option<TextChecksum>,
}

enum TextChecksum {
    Sha1(sha1::Sha1, [u8; 20]),
    Md5(md5::Md5, [u8; 16]),
}

impl<'a> DumpReader<'a> {
    /// `last_rev` carries the highest revision seen in previously chained
    /// inputs, so monotonicity holds across file boundaries.
    pub(crate) fn new(
        source: &'a mut dyn std::io::BufRead,
        verify_data_hash: bool,
        last_rev: Option<u64>,
    ) -> Result<Self, DumpError> {
        let header = parse_header(source)?.ok_or(DumpError::UnexpectedEof)?;

        let version_key: &[u8] = b"SVN-fs-dump-format-version";
        let raw_version = header
            .get(version_key)
            .ok_or(DumpError::MissingHeaderEntry {
                key: b"SVN-fs-dump-format-version",
            })?;
        let version = DumpVersion::parse(raw_version).ok_or_else(|| DumpError::InvalidVersion {
            version: raw_version.clone(),
        })?;

        Ok(Self {
            source,
            version,
            verify_data_hash,
            last_rev,
            rem_text: None,
            warned_keys: HashSet::new(),
        })
    }

    #[inline]
    pub(crate) fn last_rev(&self) -> Option<u64> {
        self.last_rev
    }

    pub(crate) fn next_record(&mut self) -> Result<Option<Record>, DumpError> {
        assert!(
            self.rem_text.is_none(),
            "text content has not been consumed yet",
        );

        let Some(mut header) = parse_header(self.source)? else {
            return Ok(None);
        };

        let raw_uuid = header.remove(b"UUID".as_slice());
        let raw_rev = header.remove(b"Revision-number".as_slice());
        let raw_node_path = header.remove(b"Node-path".as_slice());

        let type_cnt = usize::from(raw_uuid.is_some())
            + usize::from(raw_rev.is_some())
            + usize::from(raw_node_path.is_some());
        if type_cnt != 1 {
            return Err(DumpError::UnknownRecordType);
        }

        let record = if let Some(raw_uuid) = raw_uuid {
            self.read_uuid_record(&mut header, raw_uuid)?
        } else if let Some(raw_rev) = raw_rev {
            self.read_rev_record(&mut header, raw_rev)?
        } else {
            self.read_node_record(&mut header, raw_node_path.unwrap())?
        };

        for key in header.into_keys() {
            if self.warned_keys.insert(key.clone()) {
                tracing::warn!("ignoring unknown header entry \"{}\"", key.escape_ascii());
            }
        }

        Ok(Some(record))
    }

    fn read_uuid_record(
        &mut self,
        header: &mut RecordHeader,
        raw_uuid: Vec<u8>,
    ) -> Result<Record, DumpError> {
        if take_u64(header, b"Content-length")?.unwrap_or(0) != 0 {
            return Err(DumpError::MismatchedContentLen);
        }

        let uuid =
            uuid::Uuid::try_parse_ascii(&raw_uuid).map_err(|_| DumpError::InvalidHeaderEntry {
                key: b"UUID".to_vec(),
                value: raw_uuid,
            })?;
        Ok(Record::Uuid(uuid))
    }

    fn read_rev_record(
        &mut self,
        header: &mut RecordHeader,
        raw_rev: Vec<u8>,
    ) -> Result<Record, DumpError> {
        let rev = std::str::from_utf8(&raw_rev)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| DumpError::InvalidHeaderEntry {
                key: b"Revision-number".to_vec(),
                value: raw_rev.clone(),
            })?;

        if let Some(last_rev) = self.last_rev {
            if rev <= last_rev {
                return Err(DumpError::RevisionRegression { rev, last_rev });
            }
        }
        self.last_rev = Some(rev);

        let prop_content_len = take_u64(header, b"Prop-content-length")?;
        let content_len = take_u64(header, b"Content-length")?;
        if prop_content_len.unwrap_or(0) != content_len.unwrap_or(0) {
            return Err(DumpError::MismatchedContentLen);
        }

        let properties = prop_content_len
            .map(|len| self.read_props(len, false))
            .transpose()?
            .map(|props| {
                props
                    .into_iter()
                    .map(|(k, v)| (k, v.expect("non-delta properties have no deletions")))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Record::Rev(RevRecord { rev, properties }))
    }

    fn read_node_record(
        &mut self,
        header: &mut RecordHeader,
        path: Vec<u8>,
    ) -> Result<Record, DumpError> {
        let kind = header
            .remove(b"Node-kind".as_slice())
            .map(|raw| {
                NodeKind::parse(&raw).ok_or(DumpError::InvalidHeaderEntry {
                    key: b"Node-kind".to_vec(),
                    value: raw,
                })
            })
            .transpose()?;

        let raw_action =
            header
                .remove(b"Node-action".as_slice())
                .ok_or(DumpError::MissingHeaderEntry {
                    key: b"Node-action",
                })?;
        let action = NodeAction::parse(&raw_action).ok_or(DumpError::InvalidHeaderEntry {
            key: b"Node-action".to_vec(),
            value: raw_action,
        })?;

        let copy_from = self.take_copy_from(header)?;

        let prop_content_len = take_u64(header, b"Prop-content-length")?;
        let text_content_len = take_u64(header, b"Text-content-length")?;
        let content_len = take_u64(header, b"Content-length")?;

        let expected_content_len = prop_content_len
            .unwrap_or(0)
            .checked_add(text_content_len.unwrap_or(0))
            .ok_or(DumpError::MismatchedContentLen)?;
        if content_len.unwrap_or(0) != expected_content_len {
            return Err(DumpError::MismatchedContentLen);
        }

        let properties = prop_content_len
            .map(|len| {
                let is_delta = self.take_delta_flag(header, b"Prop-delta")?;
                let properties = self.read_props(len, is_delta)?;
                Ok::<_, DumpError>(NodeProperties {
                    is_delta,
                    properties,
                })
            })
            .transpose()?;

        let text = text_content_len
            .map(|length| {
                let is_delta = self.take_delta_flag(header, b"Text-delta")?;
                let text = NodeText {
                    is_delta,
                    length,
                    md5: take_hash::<16>(header, b"Text-content-md5")?,
                    sha1: take_hash::<20>(header, b"Text-content-sha1")?,
                    delta_base_md5: take_hash::<16>(header, b"Text-delta-base-md5")?,
                    delta_base_sha1: take_hash::<20>(header, b"Text-delta-base-sha1")?,
                };

                let verify = if self.verify_data_hash && !is_delta {
                    if let Some(sha1) = text.sha1 {
                        Some(TextChecksum::Sha1(sha1::Sha1::new(), sha1))
                    } else {
                        text.md5.map(|md5| TextChecksum::Md5(md5::Md5::new(), md5))
                    }
                } else {
                    None
                };
                self.rem_text = Some(PendingText {
                    path: path.clone(),
                    rem_len: length,
                    verify,
                });

                Ok::<_, DumpError>(text)
            })
            .transpose()?;

        Ok(Record::Node(NodeRecord {
            path,
            kind,
            action,
            copy_from,
            properties,
            text,
        }))
    }

    fn take_copy_from(
        &mut self,
        header: &mut RecordHeader,
    ) -> Result<Option<NodeCopyFrom>, DumpError> {
        let raw_rev = header.remove(b"Node-copyfrom-rev".as_slice());
        let raw_path = header.remove(b"Node-copyfrom-path".as_slice());
        match (raw_rev, raw_path) {
            (None, None) => Ok(None),
            (Some(raw_rev), Some(path)) => {
                let rev = std::str::from_utf8(&raw_rev)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| DumpError::InvalidHeaderEntry {
                        key: b"Node-copyfrom-rev".to_vec(),
                        value: raw_rev.clone(),
                    })?;
                Ok(Some(NodeCopyFrom {
                    rev,
                    path,
                    source_md5: take_hash::<16>(header, b"Text-copy-source-md5")?,
                    source_sha1: take_hash::<20>(header, b"Text-copy-source-sha1")?,
                }))
            }
            (Some(_), None) => Err(DumpError::MissingHeaderEntry {
                key: b"Node-copyfrom-path",
            }),
            (None, Some(_)) => Err(DumpError::MissingHeaderEntry {
                key: b"Node-copyfrom-rev",
            }),
        }
    }

    fn take_delta_flag(
        &self,
        header: &mut RecordHeader,
        key: &'static [u8],
    ) -> Result<bool, DumpError> {
        let Some(raw) = header.remove(key) else {
            return Ok(false);
        };
        let value = parse_bool(&raw).ok_or(DumpError::InvalidHeaderEntry {
            key: key.to_vec(),
            value: raw,
        })?;
        if value && !self.version.allows_deltas() {
            return Err(DumpError::UnexpectedHeaderEntry { key });
        }
        Ok(value)
    }

    fn read_props(
        &mut self,
        len: u64,
        is_delta: bool,
    ) -> Result<HashMap<Vec<u8>, Option<Vec<u8>>>, DumpError> {
        let mut prop_stream = (&mut self.source).take(len);
        match parse_properties(&mut prop_stream, is_delta) {
            Ok(props) => {
                if prop_stream.limit() != 0 {
                    Err(DumpError::BrokenProperties)
                } else {
                    Ok(props)
                }
            }
            Err(e) => match e.kind() {
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                    Err(DumpError::BrokenProperties)
                }
                _ => Err(DumpError::Io(e)),
            },
        }
    }

    /// Remaining text bytes of the current node, 0 when already drained.
    #[inline]
    pub(crate) fn remaining_text_len(&self) -> u64 {
        self.rem_text.as_ref().map_or(0, |t| t.rem_len)
    }

    /// Reads `buf.len()` bytes of the pending text content, feeding the
    /// checksum when verification is active.
    pub(crate) fn read_text(&mut self, buf: &mut [u8]) -> Result<(), DumpError> {
        let pending = self.rem_text.as_mut().expect("no pending text content");
        let len_u64 = u64::try_from(buf.len())
            .ok()
            .filter(|&l| l <= pending.rem_len)
            .expect("buffer larger than remaining text");

        self.source.read_exact(buf)?;
        pending.rem_len -= len_u64;
        match pending.verify {
            Some(TextChecksum::Sha1(ref mut h, _)) => h.update(&buf),
            Some(TextChecksum::Md5(ref mut h, _)) => h.update(&buf),
            None => {}
        }

        if pending.rem_len == 0 {
            let pending = self.rem_text.take().unwrap();
            finish_checksum(pending)?;
        }
        Ok(())
    }

    /// Drains and returns the whole pending text content of the last node
    /// record, verifying declared checksums when enabled.
    pub(crate) fn take_text(&mut self) -> Result<Vec<u8>, DumpError> {
        let len = usize::try_from(self.remaining_text_len()).expect("text length overflows usize");
        let mut data = vec![0; len];
        if len != 0 {
            self.read_text(&mut data)?;
        } else if let Some(pending) = self.rem_text.take() {
            finish_checksum(pending)?;
        }
        Ok(data)
    }
}

fn finish_checksum(pending: PendingText) -> Result<(), DumpError> {
    match pending.verify {
        Some(TextChecksum::Sha1(h, declared)) => {
            if h.finalize().as_slice() != declared {
                return Err(DumpError::HashMismatch {
                    path: pending.path,
                    algo: "SHA1",
                });
            }
        }
        Some(TextChecksum::Md5(h, declared)) => {
            if h.finalize().as_slice() != declared {
                return Err(DumpError::HashMismatch {
                    path: pending.path,
                    algo: "MD5",
                });
            }
        }
        None => {}
    }
    Ok(())
}

type RecordHeader = HashMap<Vec<u8>, Vec<u8>>;

fn take_u64(header: &mut RecordHeader, key: &'static [u8]) -> Result<Option<u64>, DumpError> {
    header
        .remove(key)
        .map(|raw| {
            std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| DumpError::InvalidHeaderEntry {
                    key: key.to_vec(),
                    value: raw,
                })
        })
        .transpose()
}

fn take_hash<const N: usize>(
    header: &mut RecordHeader,
    key: &'static [u8],
) -> Result<Option<[u8; N]>, DumpError> {
    header
        .remove(key)
        .map(|raw| {
            parse_hex::<N>(&raw).ok_or_else(|| DumpError::InvalidHeaderEntry {
                key: key.to_vec(),
                value: raw,
            })
        })
        .transpose()
}

fn parse_header(r: &mut dyn std::io::BufRead) -> Result<Option<RecordHeader>, DumpError> {
    let mut buf = Vec::new();
    r.read_until(b'\n', &mut buf)?;
    while buf == b"\n" {
        buf.clear();
        r.read_until(b'\n', &mut buf)?;
    }
    if buf.is_empty() {
        return Ok(None);
    }
    let mut map = HashMap::new();
    while buf != b"\n" {
        let line = buf.strip_suffix(b"\n").ok_or(DumpError::MalformedHeader)?;

        let sep_pos = line
            .windows(2)
            .position(|n| n == b": ")
            .ok_or(DumpError::MalformedHeader)?;
        map.insert(line[..sep_pos].to_vec(), line[(sep_pos + 2)..].to_vec());

        buf.clear();
        r.read_until(b'\n', &mut buf)?;
    }

    Ok(Some(map))
}

fn parse_properties(
    r: &mut dyn std::io::BufRead,
    is_delta: bool,
) -> Result<HashMap<Vec<u8>, Option<Vec<u8>>>, std::io::Error> {
    fn invalid() -> std::io::Error {
        std::io::Error::from(std::io::ErrorKind::InvalidData)
    }

    fn read_sized(r: &mut dyn std::io::BufRead, raw_len: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let len = std::str::from_utf8(raw_len)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(invalid)?;

        let mut data = vec![0; len];
        r.read_exact(&mut data)?;

        let mut nl = [0];
        r.read_exact(&mut nl)?;
        if nl != *b"\n" {
            return Err(invalid());
        }
        Ok(data)
    }

    let mut buf = Vec::new();
    let mut props = HashMap::new();
    loop {
        buf.clear();
        r.read_until(b'\n', &mut buf)?;
        let line = buf
            .strip_suffix(b"\n")
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;

        if line == b"PROPS-END" {
            break;
        }

        if let Some(raw_key_len) = line.strip_prefix(b"K ") {
            let raw_key_len = raw_key_len.to_vec();
            let key = read_sized(r, &raw_key_len)?;

            buf.clear();
            r.read_until(b'\n', &mut buf)?;
            let line = buf
                .strip_suffix(b"\n")
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;
            let raw_value_len = line.strip_prefix(b"V ").ok_or_else(invalid)?.to_vec();
            let value = read_sized(r, &raw_value_len)?;

            props.insert(key, Some(value));
        } else if let Some(raw_key_len) = line.strip_prefix(b"D ") {
            if !is_delta {
                return Err(invalid());
            }
            let raw_key_len = raw_key_len.to_vec();
            let key = read_sized(r, &raw_key_len)?;
            props.insert(key, None);
        } else {
            return Err(invalid());
        }
    }

    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::{DumpError, DumpReader, NodeAction, NodeKind, Record};

    fn reader_over(src: &mut std::io::Cursor<Vec<u8>>, verify: bool) -> DumpReader<'_> {
        DumpReader::new(src, verify, None).unwrap()
    }

    fn sample_dump() -> Vec<u8> {
        let mut d = Vec::new();
        d.extend(b"SVN-fs-dump-format-version: 2\n\n".as_slice());
        d.extend(b"UUID: 7bb0f766-2a1b-4ad4-8e4f-6f59f27b8b7e\n\n".as_slice());
        d.extend(
            b"Revision-number: 1\n\
              Prop-content-length: 58\n\
              Content-length: 58\n\
              \n\
              K 7\n\
              svn:log\n\
              V 5\n\
              hello\n\
              K 10\n\
              svn:author\n\
              V 5\n\
              alice\n\
              PROPS-END\n\
              \n"
                .as_slice(),
        );
        d.extend(
            b"Node-path: trunk\n\
              Node-kind: dir\n\
              Node-action: add\n\
              \n"
                .as_slice(),
        );
        d.extend(
            b"Node-path: trunk/a.txt\n\
              Node-kind: file\n\
              Node-action: add\n\
              Text-content-length: 6\n\
              Text-content-md5: 1ddab9058a07abc0db2605ab02a61a00\n\
              Content-length: 6\n\
              \n\
              line1\n\
              \n"
                .as_slice(),
        );
        d
    }

    #[test]
    fn reads_records_in_order() {
        let mut src = std::io::Cursor::new(sample_dump());
        let mut reader = reader_over(&mut src, false);

        assert!(matches!(
            reader.next_record().unwrap(),
            Some(Record::Uuid(_))
        ));

        let Some(Record::Rev(rev)) = reader.next_record().unwrap() else {
            panic!("expected revision record");
        };
        assert_eq!(rev.rev, 1);
        assert_eq!(
            rev.properties.get(b"svn:author".as_slice()).unwrap(),
            b"alice"
        );

        let Some(Record::Node(dir)) = reader.next_record().unwrap() else {
            panic!("expected node record");
        };
        assert_eq!(dir.path, b"trunk");
        assert_eq!(dir.kind, Some(NodeKind::Dir));
        assert_eq!(dir.action, NodeAction::Add);
        assert!(dir.text.is_none());

        let Some(Record::Node(file)) = reader.next_record().unwrap() else {
            panic!("expected node record");
        };
        assert_eq!(file.path, b"trunk/a.txt");
        assert_eq!(file.kind, Some(NodeKind::File));
        let text = file.text.as_ref().unwrap();
        assert_eq!(text.length, 6);
        assert!(!text.is_delta);
        assert_eq!(reader.take_text().unwrap(), b"line1\n");

        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.last_rev(), Some(1));
    }

    #[test]
    fn verifies_declared_md5() {
        let mut src = std::io::Cursor::new(sample_dump());
        let mut reader = reader_over(&mut src, true);
        for _ in 0..4 {
            reader.next_record().unwrap();
        }
        assert!(reader.take_text().is_ok());
    }

    #[test]
    fn rejects_md5_mismatch() {
        let mut dump = sample_dump();
        let pos = dump.windows(6).position(|w| w == b"line1\n").unwrap();
        dump[pos] = b'L';

        let mut src = std::io::Cursor::new(dump);
        let mut reader = reader_over(&mut src, true);
        for _ in 0..4 {
            reader.next_record().unwrap();
        }
        assert!(matches!(
            reader.take_text(),
            Err(DumpError::HashMismatch { algo: "MD5", .. })
        ));
    }

    #[test]
    fn rejects_revision_regression() {
        let mut dump = Vec::new();
        dump.extend(b"SVN-fs-dump-format-version: 2\n\n".as_slice());
        dump.extend(b"Revision-number: 5\nContent-length: 0\n\n".as_slice());
        dump.extend(b"Revision-number: 5\nContent-length: 0\n\n".as_slice());

        let mut src = std::io::Cursor::new(dump);
        let mut reader = reader_over(&mut src, false);
        reader.next_record().unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(DumpError::RevisionRegression {
                rev: 5,
                last_rev: 5
            })
        ));
    }

    #[test]
    fn regression_check_spans_chained_inputs() {
        let mut src = std::io::Cursor::new(
            b"SVN-fs-dump-format-version: 2\n\n\
              Revision-number: 3\nContent-length: 0\n\n"
                .to_vec(),
        );
        let mut reader = DumpReader::new(&mut src, false, Some(7)).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(DumpError::RevisionRegression {
                rev: 3,
                last_rev: 7
            })
        ));
    }

    #[test]
    fn rejects_delta_flag_in_v2() {
        let mut dump = Vec::new();
        dump.extend(b"SVN-fs-dump-format-version: 2\n\n".as_slice());
        dump.extend(b"Revision-number: 1\nContent-length: 0\n\n".as_slice());
        dump.extend(
            b"Node-path: f\n\
              Node-kind: file\n\
              Node-action: add\n\
              Text-delta: true\n\
              Text-content-length: 4\n\
              Content-length: 4\n\
              \n\
              abcd\n"
                .as_slice(),
        );

        let mut src = std::io::Cursor::new(dump);
        let mut reader = reader_over(&mut src, false);
        reader.next_record().unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(DumpError::UnexpectedHeaderEntry { .. })
        ));
    }
}
