use std::collections::BTreeMap;

// svn:mergeinfo property format: one line per merge source,
// "/source/path:2-16,33,40-43*", where "*" marks a non-inheritable range.

/// Sorted, non-overlapping, inclusive revision ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RevRanges {
    spans: Vec<Span>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) inheritable: bool,
}

impl RevRanges {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    #[inline]
    pub(crate) fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub(crate) fn add(&mut self, start: u64, end: u64, inheritable: bool) {
        if start > end {
            return;
        }

        let mut merged = Vec::with_capacity(self.spans.len() + 1);
        let mut new = Span {
            start,
            end,
            inheritable,
        };
        let mut placed = false;
        for &span in self.spans.iter() {
            if placed {
                merged.push(span);
            } else if span.inheritable == new.inheritable
                && span.start <= new.end.saturating_add(1)
                && new.start <= span.end.saturating_add(1)
            {
                // overlapping or adjacent with the same flag, coalesce
                new.start = new.start.min(span.start);
                new.end = new.end.max(span.end);
            } else if span.start > new.end {
                merged.push(new);
                merged.push(span);
                placed = true;
            } else {
                merged.push(span);
            }
        }
        if !placed {
            merged.push(new);
        }
        self.spans = merged;
    }

    pub(crate) fn union(&mut self, other: &Self) {
        for &span in other.spans.iter() {
            self.add(span.start, span.end, span.inheritable);
        }
    }

    /// Removes every revision of `other` from `self`, ignoring the
    /// inheritable flags of `other`.
    pub(crate) fn subtract(&self, other: &Self) -> Self {
        let mut result = Vec::new();
        for &span in self.spans.iter() {
            let mut cur = Some(span);
            for &sub in other.spans.iter() {
                let Some(span) = cur else { break };
                if sub.end < span.start {
                    continue;
                }
                if sub.start > span.end {
                    break;
                }
                cur = None;
                if sub.start > span.start {
                    result.push(Span {
                        start: span.start,
                        end: sub.start - 1,
                        inheritable: span.inheritable,
                    });
                }
                if sub.end < span.end {
                    cur = Some(Span {
                        start: sub.end + 1,
                        end: span.end,
                        inheritable: span.inheritable,
                    });
                }
            }
            if let Some(span) = cur {
                result.push(span);
            }
        }
        Self { spans: result }
    }

    pub(crate) fn contains(&self, rev: u64) -> bool {
        self.spans
            .iter()
            .any(|span| span.start <= rev && rev <= span.end)
    }

    fn parse(mut raw: &[u8]) -> Self {
        let mut ranges = Self::new();
        while !raw.is_empty() {
            let part;
            (part, raw) = match raw.iter().position(|&c| c == b',') {
                Some(i) => (&raw[..i], &raw[(i + 1)..]),
                None => (raw, b"".as_slice()),
            };

            let (part, inheritable) = match part.strip_suffix(b"*") {
                Some(stripped) => (stripped, false),
                None => (part, true),
            };

            let (raw_start, raw_end) = match part.iter().position(|&c| c == b'-') {
                Some(i) => (&part[..i], &part[(i + 1)..]),
                None => (part, part),
            };

            let parse_rev = |s: &[u8]| {
                std::str::from_utf8(s)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
            };
            match (parse_rev(raw_start), parse_rev(raw_end)) {
                (Some(start), Some(end)) => ranges.add(start, end, inheritable),
                _ => {
                    tracing::warn!(
                        "ignoring unparsable mergeinfo range \"{}\"",
                        part.escape_ascii(),
                    );
                }
            }
        }
        ranges
    }
}

/// A parsed `svn:mergeinfo` value: merge source path to merged revisions.
/// Paths are stored with the leading slash stripped; the repository root
/// becomes the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Mergeinfo {
    paths: BTreeMap<Vec<u8>, RevRanges>,
}

impl Mergeinfo {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn parse(raw: &[u8]) -> Self {
        let mut mergeinfo = Self::new();
        for line in raw.split(|&c| c == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            // The path may contain ':' only in theory; SVN writes the
            // range list after the last one.
            let Some(sep) = line.iter().rposition(|&c| c == b':') else {
                tracing::warn!(
                    "ignoring mergeinfo line without ranges: \"{}\"",
                    line.escape_ascii(),
                );
                continue;
            };

            // Old SVN versions wrote source paths without a leading slash.
            let path = line[..sep].strip_prefix(b"/").unwrap_or(&line[..sep]);
            let ranges = RevRanges::parse(&line[(sep + 1)..]);
            if !ranges.is_empty() {
                mergeinfo
                    .paths
                    .entry(path.to_vec())
                    .or_default()
                    .union(&ranges);
            }
        }
        mergeinfo
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &RevRanges)> {
        self.paths.iter().map(|(p, r)| (p.as_slice(), r))
    }

    /// The entries of `self` not present in `prev`: for every source path,
    /// the revisions not already recorded at the same path or one of its
    /// ancestor paths in `prev`.
    pub(crate) fn diff_from(&self, prev: &Self) -> Self {
        let mut added = Self::new();
        for (path, ranges) in self.paths.iter() {
            let mut rem = ranges.clone();

            let mut ancestor: &[u8] = path;
            loop {
                if let Some(prev_ranges) = prev.paths.get(ancestor) {
                    rem = rem.subtract(prev_ranges);
                    if rem.is_empty() {
                        break;
                    }
                }
                match ancestor.iter().rposition(|&c| c == b'/') {
                    Some(sep) => ancestor = &ancestor[..sep],
                    None if !ancestor.is_empty() => ancestor = b"",
                    None => break,
                }
            }

            if !rem.is_empty() {
                added.paths.insert(path.clone(), rem);
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::{Mergeinfo, RevRanges};

    fn spans(ranges: &RevRanges) -> Vec<(u64, u64, bool)> {
        ranges
            .spans()
            .iter()
            .map(|s| (s.start, s.end, s.inheritable))
            .collect()
    }

    fn get<'a>(mi: &'a Mergeinfo, path: &[u8]) -> Option<&'a RevRanges> {
        mi.iter().find(|(p, _)| *p == path).map(|(_, r)| r)
    }

    #[test]
    fn parses_paths_and_ranges() {
        let mi = Mergeinfo::parse(b"/branches/feat:2-16,20\n/trunk:5*\n");

        assert_eq!(
            spans(get(&mi, b"branches/feat").unwrap()),
            [(2, 16, true), (20, 20, true)],
        );
        assert_eq!(spans(get(&mi, b"trunk").unwrap()), [(5, 5, false)]);
    }

    #[test]
    fn accepts_paths_without_leading_slash() {
        let mi = Mergeinfo::parse(b"branches/feat:3-4\n");
        assert!(get(&mi, b"branches/feat").is_some());
    }

    #[test]
    fn ranges_coalesce() {
        let mut r = RevRanges::new();
        r.add(5, 10, true);
        r.add(12, 14, true);
        r.add(11, 11, true);
        r.add(1, 2, true);
        assert_eq!(spans(&r), [(1, 2, true), (5, 14, true)]);

        // a non-inheritable range does not fuse with an inheritable one
        r.add(15, 16, false);
        assert_eq!(spans(&r), [(1, 2, true), (5, 14, true), (15, 16, false)]);
    }

    #[test]
    fn subtract_splits_spans() {
        let mut a = RevRanges::new();
        a.add(1, 20, true);
        let mut b = RevRanges::new();
        b.add(5, 7, true);
        b.add(15, 30, true);

        assert_eq!(spans(&a.subtract(&b)), [(1, 4, true), (8, 14, true)]);
    }

    #[test]
    fn diff_reports_only_new_entries() {
        let prev = Mergeinfo::parse(b"/branches/feat:2-10\n");
        let cur = Mergeinfo::parse(b"/branches/feat:2-16\n/branches/other:4\n");

        let diff = cur.diff_from(&prev);
        assert_eq!(spans(get(&diff, b"branches/feat").unwrap()), [(11, 16, true)]);
        assert_eq!(spans(get(&diff, b"branches/other").unwrap()), [(4, 4, true)]);
        assert!(get(&diff, b"trunk").is_none());
    }

    #[test]
    fn diff_honors_ancestor_entries() {
        // /dir:100-200 in prev covers /dir/file:100-200 in cur
        let prev = Mergeinfo::parse(b"/dir:100-200\n");
        let cur = Mergeinfo::parse(b"/dir/file:100-200\n");
        assert!(cur.diff_from(&prev).is_empty());
    }

}
