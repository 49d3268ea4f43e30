use regex_syntax::hir as regex_hir;

// Glob grammar:
//   ?        one byte except '/'          (capturing)
//   *        any bytes except '/'         (capturing; a whole component
//                                          requires at least one byte)
//   **       any bytes including '/'      (capturing; "**/" captures the
//                                          trailing slash so substitution
//                                          degrades to "" cleanly)
//   {a,b}    alternation of literal-ish alternatives (non-capturing)
// Lists are ';' or ',' separated; a '!' prefix negates an item, "\!"
// escapes a literal '!'.

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum GlobError {
    UnclosedBrace,
    NestedBrace,
    EmptyPattern,
}

impl std::fmt::Display for GlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnclosedBrace => write!(f, "unclosed '{{'"),
            Self::NestedBrace => write!(f, "'{{' inside alternation"),
            Self::EmptyPattern => write!(f, "empty pattern"),
        }
    }
}

/// How a compiled glob is applied to candidate paths.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MatchMode {
    /// Anchored full match of the whole string, no implicit prefix.
    Exact,
    /// The pattern names a directory; matching is a prefix match on a
    /// component boundary and yields captures plus the residual tail.
    DirPrefix,
    /// The pattern names files (trailing '/' names a directory and all of
    /// its content); patterns without '/' match at any depth.
    FilePath,
}

pub(crate) struct Glob {
    pattern: String,
    mode: MatchMode,
    regex: regex_automata::meta::Regex,
    num_captures: u32,
}

/// A successful [`MatchMode::DirPrefix`] match.
pub(crate) struct DirMatch {
    /// Captured wildcard texts, in pattern order. A non-participating
    /// capture ("**/" matching nothing) is an empty string.
    pub(crate) captures: Vec<Vec<u8>>,
    /// Length of the matched directory prefix in the candidate path.
    pub(crate) prefix_len: usize,
}

impl Glob {
    pub(crate) fn compile(pattern: &str, mode: MatchMode) -> Result<Self, GlobError> {
        if pattern.is_empty() {
            return Err(GlobError::EmptyPattern);
        }

        // collapse duplicated separators before compiling
        let mut normalized = String::with_capacity(pattern.len());
        for chunk in pattern.split('/') {
            if chunk.is_empty() && !normalized.is_empty() {
                continue;
            }
            if !normalized.is_empty() {
                normalized.push('/');
            }
            normalized.push_str(chunk);
        }
        let mut pattern_str = normalized;

        if mode == MatchMode::DirPrefix && !pattern_str.ends_with('/') {
            pattern_str.push('/');
        }

        let mut hir = Vec::new();
        hir.push(regex_hir::Hir::look(regex_hir::Look::Start));

        // A pattern without any separator applies at any depth.
        let body = pattern_str.strip_suffix('/').unwrap_or(&pattern_str);
        if mode != MatchMode::Exact && !body.contains('/') && !body.contains("**") {
            hir.push(optional_depth_prefix());
        }

        let mut next_capture = 1u32;
        compile_into(&mut hir, &pattern_str, &mut Some(&mut next_capture))?;

        match mode {
            MatchMode::Exact => {
                hir.push(regex_hir::Hir::look(regex_hir::Look::End));
            }
            MatchMode::DirPrefix => {
                // the compiled pattern ends with '/'; prefix matching stops
                // there and the caller slices the tail off
            }
            MatchMode::FilePath => {
                if pattern_str.ends_with('/') {
                    // a directory pattern covers everything below it
                    hir.push(any_bytes());
                } else {
                    // a file pattern also covers a directory of that name
                    hir.push(regex_hir::Hir::repetition(regex_hir::Repetition {
                        min: 0,
                        max: Some(1),
                        greedy: true,
                        sub: Box::new(regex_hir::Hir::concat(vec![
                            regex_hir::Hir::literal(b"/".as_slice()),
                            any_bytes(),
                        ])),
                    }));
                }
                hir.push(regex_hir::Hir::look(regex_hir::Look::End));
            }
        }

        let hir = regex_hir::Hir::concat(hir);
        let regex = regex_automata::meta::Builder::new()
            .build_from_hir(&hir)
            .expect("failed to build regex from glob");

        Ok(Self {
            pattern: pattern.to_string(),
            mode,
            regex,
            num_captures: next_capture - 1,
        })
    }

    #[inline]
    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the glob covers `path`. In [`MatchMode::DirPrefix`] this is
    /// the prefix test (the named directory or anything below it).
    pub(crate) fn is_match(&self, path: &[u8]) -> bool {
        match self.mode {
            MatchMode::DirPrefix => {
                let mut input = Vec::with_capacity(path.len() + 1);
                input.extend(path);
                input.push(b'/');
                self.regex.is_match(&input)
            }
            MatchMode::Exact | MatchMode::FilePath => self.regex.is_match(path),
        }
    }

    /// Prefix match of a directory path (no trailing slash) in
    /// [`MatchMode::DirPrefix`]. `prefix_len` spans the matched directory;
    /// the tail starts behind the separator.
    pub(crate) fn match_dir(&self, path: &[u8]) -> Option<DirMatch> {
        let mut input = Vec::with_capacity(path.len() + 1);
        input.extend(path);
        input.push(b'/');

        let mut caps = self.regex.create_captures();
        self.regex.captures(&input, &mut caps);
        let overall = caps.get_match()?;

        let mut captures = Vec::with_capacity(self.num_captures as usize);
        for i in 1..=self.num_captures {
            let text = caps
                .get_group(i as usize)
                .map(|span| input[span.start..span.end].to_vec())
                .unwrap_or_default();
            captures.push(text);
        }

        // the compiled pattern always ends with '/', so the match end sits
        // one past a component boundary
        Some(DirMatch {
            captures,
            prefix_len: overall.end().saturating_sub(1),
        })
    }
}

fn non_slash() -> regex_hir::Hir {
    regex_hir::Hir::class(regex_hir::Class::Bytes(regex_hir::ClassBytes::new([
        regex_hir::ClassBytesRange::new(u8::MIN, b'/' - 1),
        regex_hir::ClassBytesRange::new(b'/' + 1, u8::MAX),
    ])))
}

fn repeated_non_slash(min: u32) -> regex_hir::Hir {
    regex_hir::Hir::repetition(regex_hir::Repetition {
        min,
        max: None,
        greedy: true,
        sub: Box::new(non_slash()),
    })
}

fn any_bytes() -> regex_hir::Hir {
    regex_hir::Hir::repetition(regex_hir::Repetition {
        min: 0,
        max: None,
        greedy: true,
        sub: Box::new(regex_hir::Hir::dot(regex_hir::Dot::AnyByte)),
    })
}

// "(?:[^/]*/)*" — the implicit any-depth prefix of separator-free patterns
fn optional_depth_prefix() -> regex_hir::Hir {
    regex_hir::Hir::repetition(regex_hir::Repetition {
        min: 0,
        max: None,
        greedy: true,
        sub: Box::new(regex_hir::Hir::concat(vec![
            repeated_non_slash(0),
            regex_hir::Hir::literal(b"/".as_slice()),
        ])),
    })
}

fn capture(next: &mut Option<&mut u32>, sub: regex_hir::Hir) -> regex_hir::Hir {
    match next {
        Some(counter) => {
            let index = **counter;
            **counter += 1;
            regex_hir::Hir::capture(regex_hir::Capture {
                index,
                name: None,
                sub: Box::new(sub),
            })
        }
        None => sub,
    }
}

fn compile_into(
    hir: &mut Vec<regex_hir::Hir>,
    pattern: &str,
    captures: &mut Option<&mut u32>,
) -> Result<(), GlobError> {
    let bytes = pattern.as_bytes();
    let mut literal = Vec::new();
    let mut i = 0;

    macro_rules! flush_literal {
        () => {
            if !literal.is_empty() {
                hir.push(regex_hir::Hir::literal(std::mem::take(&mut literal)));
            }
        };
    }

    while i < bytes.len() {
        let at_component_start = i == 0 || bytes[i - 1] == b'/';
        match bytes[i] {
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                flush_literal!();
                if at_component_start && bytes.get(i + 2) == Some(&b'/') {
                    // "**/": zero or more whole components, slash included
                    // in the capture so substitution folds to "" cleanly
                    hir.push(regex_hir::Hir::repetition(regex_hir::Repetition {
                        min: 0,
                        max: Some(1),
                        greedy: true,
                        sub: Box::new(capture(
                            captures,
                            regex_hir::Hir::concat(vec![
                                any_bytes(),
                                regex_hir::Hir::literal(b"/".as_slice()),
                            ]),
                        )),
                    }));
                    i += 3;
                } else {
                    hir.push(capture(captures, any_bytes()));
                    i += 2;
                }
            }
            b'*' => {
                flush_literal!();
                // a wildcard standing for a whole component must not
                // match the empty name
                let whole_component = at_component_start
                    && matches!(bytes.get(i + 1), None | Some(&b'/'));
                hir.push(capture(
                    captures,
                    repeated_non_slash(u32::from(whole_component)),
                ));
                i += 1;
            }
            b'?' => {
                flush_literal!();
                hir.push(capture(captures, non_slash()));
                i += 1;
            }
            b'{' => {
                flush_literal!();
                let end = bytes[i..]
                    .iter()
                    .position(|&c| c == b'}')
                    .ok_or(GlobError::UnclosedBrace)?
                    + i;
                let inner = &pattern[(i + 1)..end];
                if inner.contains('{') {
                    return Err(GlobError::NestedBrace);
                }

                let mut alts = Vec::new();
                for alt in inner.split(',') {
                    let mut alt_hir = Vec::new();
                    compile_into(&mut alt_hir, alt, &mut None)?;
                    alts.push(regex_hir::Hir::concat(alt_hir));
                }
                hir.push(regex_hir::Hir::alternation(alts));
                i = end + 1;
            }
            b'\\' if matches!(bytes.get(i + 1), Some(&b'!' | &b'$' | &b'\\')) => {
                literal.push(bytes[i + 1]);
                i += 2;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    flush_literal!();

    Ok(())
}

/// A ';'/','-separated pattern list with `!` negatives. Scanning is left
/// to right: the first positive hit accepts, any negative hit rejects,
/// and a list with no positive entries accepts by default.
pub(crate) struct GlobList {
    items: Vec<(Glob, bool)>,
    has_positive: bool,
}

impl GlobList {
    pub(crate) fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_positive: false,
        }
    }

    pub(crate) fn parse(raw: &str, mode: MatchMode) -> Result<Self, (String, GlobError)> {
        let mut list = Self::empty();
        list.extend(raw, mode)?;
        Ok(list)
    }

    pub(crate) fn extend(&mut self, raw: &str, mode: MatchMode) -> Result<(), (String, GlobError)> {
        for item in raw.split([';', ',']) {
            if item.is_empty() {
                continue;
            }

            let (pattern, positive) = if let Some(negated) = item.strip_prefix('!') {
                (negated, false)
            } else if let Some(escaped) = item.strip_prefix("\\!") {
                (escaped, true)
            } else {
                (item, true)
            };

            let glob =
                Glob::compile(pattern, mode).map_err(|e| (pattern.to_string(), e))?;
            self.items.push((glob, positive));
            self.has_positive |= positive;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Tri-state scan: `Some(false)` when any negative entry hits (a
    /// negative always vetoes, so "G;!G" never accepts), `Some(true)` on
    /// the first positive hit otherwise, `None` when nothing matched.
    pub(crate) fn eval(&self, path: &[u8]) -> Option<bool> {
        for (glob, positive) in self.items.iter() {
            if !*positive && glob.is_match(path) {
                return Some(false);
            }
        }
        for (glob, positive) in self.items.iter() {
            if *positive && glob.is_match(path) {
                return Some(true);
            }
        }
        None
    }

    /// List semantics for filters: all-negative lists accept unmatched
    /// paths, lists with positives require one of them to hit.
    pub(crate) fn accepts(&self, path: &[u8]) -> bool {
        match self.eval(path) {
            Some(hit) => hit,
            None => !self.has_positive,
        }
    }

    /// Plain "does any positive entry hit" test, negatives veto.
    pub(crate) fn is_match(&self, path: &[u8]) -> bool {
        self.eval(path) == Some(true)
    }
}

/// Expands a refname template against the captures of a path match.
/// `$1`..`$9` select captures explicitly; each bare `*`/`**` consumes the
/// capture after the previously used one. `/**/` folds its slashes into
/// the (possibly empty) capture text.
pub(crate) fn expand_template(template: &str, captures: &[Vec<u8>]) -> Vec<u8> {
    let bytes = template.as_bytes();
    let mut out = Vec::with_capacity(template.len());
    let mut last_used = 0usize;
    let mut i = 0;

    let mut emit = |out: &mut Vec<u8>, index: usize| {
        if let Some(text) = captures.get(index.wrapping_sub(1)) {
            out.extend_from_slice(text);
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes
                .get(i + 1)
                .is_some_and(|c| (b'1'..=b'9').contains(c)) =>
            {
                let index = usize::from(bytes[i + 1] - b'0');
                emit(&mut out, index);
                last_used = index;
                i += 2;
            }
            b'/' if bytes[(i + 1)..].starts_with(b"**/") => {
                out.push(b'/');
                last_used += 1;
                emit(&mut out, last_used);
                i += 4;
            }
            b'*' if i == 0 && bytes[1..].starts_with(b"*/") => {
                last_used += 1;
                emit(&mut out, last_used);
                i += 3;
            }
            b'*' => {
                let len = if bytes.get(i + 1) == Some(&b'*') { 2 } else { 1 };
                last_used += 1;
                emit(&mut out, last_used);
                i += len;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{expand_template, Glob, GlobList, MatchMode};

    #[test]
    fn file_patterns_match_at_any_depth() {
        let glob = Glob::compile("*.obj", MatchMode::FilePath).unwrap();
        assert!(glob.is_match(b"a.obj"));
        assert!(glob.is_match(b"deep/dir/b.obj"));
        assert!(!glob.is_match(b"a.objx"));
        assert!(!glob.is_match(b"a.obj.c"));
    }

    #[test]
    fn file_pattern_with_slash_is_anchored() {
        let glob = Glob::compile("build/*.o", MatchMode::FilePath).unwrap();
        assert!(glob.is_match(b"build/x.o"));
        assert!(!glob.is_match(b"sub/build/x.o"));
    }

    #[test]
    fn dir_pattern_covers_content() {
        let glob = Glob::compile("target/", MatchMode::FilePath).unwrap();
        assert!(glob.is_match(b"target"));
        assert!(glob.is_match(b"target/debug/foo"));
        assert!(glob.is_match(b"proj/target/x"));
        assert!(!glob.is_match(b"targets/x"));
    }

    #[test]
    fn question_mark_is_single_byte() {
        let glob = Glob::compile("f?", MatchMode::Exact).unwrap();
        assert!(glob.is_match(b"fo"));
        assert!(!glob.is_match(b"foo"));
        assert!(!glob.is_match(b"f/"));
    }

    #[test]
    fn braces_expand_to_alternation() {
        let glob = Glob::compile("{trunk,branches/dev}/src", MatchMode::Exact).unwrap();
        assert!(glob.is_match(b"trunk/src"));
        assert!(glob.is_match(b"branches/dev/src"));
        assert!(!glob.is_match(b"tags/src"));
    }

    #[test]
    fn dir_prefix_match_extracts_captures_and_tail() {
        let glob = Glob::compile("**/branches/*", MatchMode::DirPrefix).unwrap();

        let m = glob.match_dir(b"proj/branches/feat/src/a.c").unwrap();
        assert_eq!(m.captures, [b"proj/".to_vec(), b"feat".to_vec()]);
        assert_eq!(m.prefix_len, b"proj/branches/feat".len());

        let m = glob.match_dir(b"branches/feat").unwrap();
        assert_eq!(m.captures, [b"".to_vec(), b"feat".to_vec()]);
        assert_eq!(m.prefix_len, b"branches/feat".len());

        assert!(glob.match_dir(b"branches").is_none());
        assert!(glob.match_dir(b"proj/tags/v1").is_none());
    }

    #[test]
    fn component_wildcard_requires_content() {
        let glob = Glob::compile("branches/*", MatchMode::DirPrefix).unwrap();
        assert!(glob.match_dir(b"branches").is_none());
        assert!(glob.match_dir(b"branches/a").is_some());
    }

    #[test]
    fn double_asterisk_matches_empty() {
        let glob = Glob::compile("**/trunk", MatchMode::DirPrefix).unwrap();
        let m = glob.match_dir(b"trunk").unwrap();
        assert_eq!(m.captures, [b"".to_vec()]);
        assert_eq!(m.prefix_len, 5);
    }

    #[test]
    fn list_negation_short_circuits() {
        let list = GlobList::parse("*.c;!test_*;*.h", MatchMode::FilePath).unwrap();
        assert!(list.is_match(b"src/a.c"));
        assert!(list.is_match(b"inc/a.h"));
        assert!(!list.is_match(b"src/test_a.c"));
        assert!(!list.is_match(b"a.txt"));
    }

    #[test]
    fn glob_and_its_negation_never_accept() {
        let list = GlobList::parse("dir/*.c;!dir/*.c", MatchMode::FilePath).unwrap();
        assert!(!list.is_match(b"dir/x.c"));
        assert!(!list.is_match(b"other"));
    }

    #[test]
    fn all_negative_list_accepts_by_default() {
        let list = GlobList::parse("!*.tmp", MatchMode::FilePath).unwrap();
        assert!(list.accepts(b"src/keep.c"));
        assert!(!list.accepts(b"junk.tmp"));

        let mixed = GlobList::parse("src/;!*.tmp", MatchMode::FilePath).unwrap();
        assert!(mixed.accepts(b"src/a.c"));
        assert!(!mixed.accepts(b"elsewhere/a.c"));
    }

    #[test]
    fn template_expansion_positional_and_numbered() {
        let glob = Glob::compile("**/branches/users/*/*", MatchMode::DirPrefix).unwrap();
        let m = glob.match_dir(b"proj/branches/users/alice/x").unwrap();

        assert_eq!(
            expand_template("refs/heads/**/users/*/*", &m.captures),
            b"refs/heads/proj/users/alice/x",
        );
        assert_eq!(
            expand_template("refs/heads/$1users/$2/$3", &m.captures),
            b"refs/heads/proj/users/alice/x",
        );
        // after an explicit $2, a bare '*' continues at $3
        assert_eq!(
            expand_template("refs/x/$2/*", &m.captures),
            b"refs/x/alice/x",
        );
    }

    #[test]
    fn template_empty_depth_capture_folds_slash() {
        let glob = Glob::compile("**/trunk", MatchMode::DirPrefix).unwrap();
        let m = glob.match_dir(b"trunk").unwrap();
        assert_eq!(
            expand_template("refs/heads/**/main", &m.captures),
            b"refs/heads/main",
        );

        let m = glob.match_dir(b"proj/trunk").unwrap();
        assert_eq!(
            expand_template("refs/heads/**/main", &m.captures),
            b"refs/heads/proj/main",
        );
    }

    #[test]
    fn unclosed_brace_is_an_error() {
        assert!(Glob::compile("{a,b", MatchMode::Exact).is_err());
    }
}
