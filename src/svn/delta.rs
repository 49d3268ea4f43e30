// svndiff format described in
// https://svn.apache.org/repos/asf/subversion/trunk/notes/svndiff

#[derive(Debug)]
pub(crate) enum DeltaError {
    BadMagic,
    UnsupportedVersion(u8),
    TruncatedWindow,
    BadVarInt,
    OffsetOverflow,
    LenOverflow,
    SourceViewOutOfBounds {
        source_len: usize,
        view_offset: usize,
        view_len: usize,
    },
    InstrOffsetOutOfView,
    NewDataExhausted,
    ReservedInstr,
    TargetLenMismatch {
        expected: usize,
        produced: usize,
    },
}

impl std::fmt::Display for DeltaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::BadMagic => write!(f, "delta stream does not start with \"SVN\\0\""),
            Self::UnsupportedVersion(v) => write!(f, "unsupported svndiff version {v}"),
            Self::TruncatedWindow => write!(f, "truncated delta window"),
            Self::BadVarInt => write!(f, "invalid variable-length integer"),
            Self::OffsetOverflow => write!(f, "offset too large"),
            Self::LenOverflow => write!(f, "length too large"),
            Self::SourceViewOutOfBounds {
                source_len,
                view_offset,
                view_len,
            } => write!(
                f,
                "source view at offset {view_offset} with length {view_len} out of bounds, source length is {source_len}",
            ),
            Self::InstrOffsetOutOfView => write!(f, "copy instruction reaches outside its view"),
            Self::NewDataExhausted => write!(f, "new-data section exhausted"),
            Self::ReservedInstr => write!(f, "reserved instruction selector"),
            Self::TargetLenMismatch { expected, produced } => write!(
                f,
                "window produced {produced} bytes, target view length is {expected}",
            ),
        }
    }
}

/// Applies a complete svndiff0 stream against `source`, appending the
/// reconstructed target to `target`.
///
/// Single pass; the whole delta must be in memory. The decoder hands over
/// delta text as one buffer, so there is no value in streaming windows.
pub(crate) fn apply(delta: &[u8], source: &[u8], target: &mut Vec<u8>) -> Result<(), DeltaError> {
    let mut rem = delta.strip_prefix(b"SVN").ok_or(DeltaError::BadMagic)?;
    let version;
    (version, rem) = rem.split_first().ok_or(DeltaError::BadMagic)?;
    if *version != 0 {
        return Err(DeltaError::UnsupportedVersion(*version));
    }

    while !rem.is_empty() {
        let window = Window::read(&mut rem)?;
        window.apply(source, target)?;
    }

    Ok(())
}

struct Window<'a> {
    source_view_offset: usize,
    source_view_len: usize,
    target_view_len: usize,
    instrs: &'a [u8],
    new_data: &'a [u8],
}

impl<'a> Window<'a> {
    fn read(rem: &mut &'a [u8]) -> Result<Self, DeltaError> {
        let source_view_offset = read_uint(rem)?;
        let source_view_len = read_uint(rem)?;
        let target_view_len = read_uint(rem)?;
        let instrs_len = read_uint(rem)?;
        let new_data_len = read_uint(rem)?;

        let source_view_offset =
            usize::try_from(source_view_offset).map_err(|_| DeltaError::OffsetOverflow)?;
        let source_view_len =
            usize::try_from(source_view_len).map_err(|_| DeltaError::LenOverflow)?;
        let target_view_len =
            usize::try_from(target_view_len).map_err(|_| DeltaError::LenOverflow)?;
        let instrs_len = usize::try_from(instrs_len).map_err(|_| DeltaError::LenOverflow)?;
        let new_data_len = usize::try_from(new_data_len).map_err(|_| DeltaError::LenOverflow)?;

        if rem.len() < instrs_len {
            return Err(DeltaError::TruncatedWindow);
        }
        let instrs;
        (instrs, *rem) = rem.split_at(instrs_len);

        if rem.len() < new_data_len {
            return Err(DeltaError::TruncatedWindow);
        }
        let new_data;
        (new_data, *rem) = rem.split_at(new_data_len);

        Ok(Self {
            source_view_offset,
            source_view_len,
            target_view_len,
            instrs,
            new_data,
        })
    }

    fn apply(&self, source: &[u8], target: &mut Vec<u8>) -> Result<(), DeltaError> {
        let view_end = self
            .source_view_offset
            .checked_add(self.source_view_len)
            .ok_or(DeltaError::OffsetOverflow)?;
        let source_view =
            source
                .get(self.source_view_offset..view_end)
                .ok_or(DeltaError::SourceViewOutOfBounds {
                    source_len: source.len(),
                    view_offset: self.source_view_offset,
                    view_len: self.source_view_len,
                })?;

        let target_start = target.len();
        target.reserve(self.target_view_len);

        let mut instrs = self.instrs;
        let mut new_data = self.new_data;
        while !instrs.is_empty() {
            match Instr::read(&mut instrs)? {
                Instr::CopySource { offset, len } => {
                    let chunk = source_view
                        .get(offset..offset.checked_add(len).ok_or(DeltaError::LenOverflow)?)
                        .ok_or(DeltaError::InstrOffsetOutOfView)?;
                    target.extend_from_slice(chunk);
                }
                Instr::CopyTarget { offset, len } => {
                    // The copied region may overlap what it is producing
                    // (run-length expansion), so this goes byte by byte.
                    let abs = target_start
                        .checked_add(offset)
                        .ok_or(DeltaError::OffsetOverflow)?;
                    if abs >= target.len() {
                        return Err(DeltaError::InstrOffsetOutOfView);
                    }
                    for i in 0..len {
                        let byte = target[abs + i];
                        target.push(byte);
                    }
                }
                Instr::CopyNew { len } => {
                    if len > new_data.len() {
                        return Err(DeltaError::NewDataExhausted);
                    }
                    let chunk;
                    (chunk, new_data) = new_data.split_at(len);
                    target.extend_from_slice(chunk);
                }
            }
        }

        let produced = target.len() - target_start;
        if produced != self.target_view_len {
            return Err(DeltaError::TargetLenMismatch {
                expected: self.target_view_len,
                produced,
            });
        }

        Ok(())
    }
}

enum Instr {
    CopySource { offset: usize, len: usize },
    CopyTarget { offset: usize, len: usize },
    CopyNew { len: usize },
}

impl Instr {
    fn read(instrs: &mut &[u8]) -> Result<Self, DeltaError> {
        let first;
        (first, *instrs) = instrs.split_first().ok_or(DeltaError::TruncatedWindow)?;

        let selector = first >> 6;
        let len = if (first & 0x3F) != 0 {
            u64::from(first & 0x3F)
        } else {
            read_uint(instrs)?
        };
        let len = usize::try_from(len).map_err(|_| DeltaError::LenOverflow)?;

        match selector {
            0b00 => {
                let offset = read_uint(instrs)?;
                let offset = usize::try_from(offset).map_err(|_| DeltaError::OffsetOverflow)?;
                Ok(Self::CopySource { offset, len })
            }
            0b01 => {
                let offset = read_uint(instrs)?;
                let offset = usize::try_from(offset).map_err(|_| DeltaError::OffsetOverflow)?;
                Ok(Self::CopyTarget { offset, len })
            }
            0b10 => Ok(Self::CopyNew { len }),
            0b11 => Err(DeltaError::ReservedInstr),
            _ => unreachable!(),
        }
    }
}

// 7 bits per byte, most significant group first, high bit is continuation.
fn read_uint(src: &mut &[u8]) -> Result<u64, DeltaError> {
    let mut value = 0u64;
    loop {
        let byte;
        (byte, *src) = src.split_first().ok_or(DeltaError::BadVarInt)?;

        if value > (u64::MAX >> 7) {
            return Err(DeltaError::BadVarInt);
        }

        value = (value << 7) | u64::from(byte & 0x7F);
        if (byte & 0x80) == 0 {
            return Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply, DeltaError};

    #[test]
    fn example_from_format_notes() {
        let source = b"aaaabbbbcccc";
        let delta = &[
            b'S', b'V', b'N', 0,    // header
            0x00, // source view offset 0
            0x0C, // source view length 12
            0x10, // target view length 16
            0x07, // instructions length 7
            0x01, // new data length 1
            0x04, 0x00, // source, length 4, offset 0
            0x04, 0x08, // source, length 4, offset 8
            0x81, // new, length 1
            0x47, 0x08, // target, length 7, offset 8
            b'd', // new data 'd'
        ];

        let mut target = Vec::new();
        apply(delta, source, &mut target).unwrap();
        assert_eq!(target, b"aaaaccccdddddddd");
    }

    #[test]
    fn empty_delta_is_empty_target() {
        let mut target = Vec::new();
        apply(b"SVN\0", b"whatever", &mut target).unwrap();
        assert!(target.is_empty());
    }

    #[test]
    fn overlapping_target_copy() {
        // One 'x' of new data expanded to eight by a self-overlapping copy.
        let delta = &[
            b'S', b'V', b'N', 0, //
            0x00, 0x00, 0x08, 0x04, 0x01, //
            0x81, // new, length 1
            0x47, 0x00, // target, length 7, offset 0
            b'x',
        ];
        let mut target = Vec::new();
        apply(delta, b"", &mut target).unwrap();
        assert_eq!(target, b"xxxxxxxx");
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut target = Vec::new();
        assert!(matches!(
            apply(b"NVS\0", b"", &mut target),
            Err(DeltaError::BadMagic)
        ));
        assert!(matches!(
            apply(b"SVN\x02", b"", &mut target),
            Err(DeltaError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_source_view_out_of_bounds() {
        let delta = &[
            b'S', b'V', b'N', 0, //
            0x04, 0x08, 0x08, 0x02, 0x00, // view 4..12 of an 8-byte source
            0x08, 0x00,
        ];
        let mut target = Vec::new();
        assert!(matches!(
            apply(delta, b"12345678", &mut target),
            Err(DeltaError::SourceViewOutOfBounds { .. })
        ));
    }

    #[test]
    fn rejects_target_len_mismatch() {
        let delta = &[
            b'S', b'V', b'N', 0, //
            0x00, 0x00, 0x08, 0x01, 0x03, // target view claims 8 bytes
            0x83, // new, length 3
            b'a', b'b', b'c',
        ];
        let mut target = Vec::new();
        assert!(matches!(
            apply(delta, b"", &mut target),
            Err(DeltaError::TargetLenMismatch { .. })
        ));
    }

    #[test]
    fn truncated_window_reports_as_such() {
        let delta = &[b'S', b'V', b'N', 0, 0x00, 0x00, 0x08, 0x7F, 0x00];
        let mut target = Vec::new();
        assert!(matches!(
            apply(delta, b"", &mut target),
            Err(DeltaError::TruncatedWindow)
        ));
    }
}
