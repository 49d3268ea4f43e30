use std::sync::OnceLock;

/// Revision facts a transformer may bake into content.
pub(crate) struct RevisionInfo<'a> {
    pub(crate) rev: u64,
    pub(crate) author: &'a [u8],
    pub(crate) date: Option<chrono::DateTime<chrono::Utc>>,
}

/// A content rewrite applied to a blob before hashing. Implementations
/// must be deterministic: identical inputs produce identical outputs, and
/// `spec()` must change whenever the rewrite rules change, since it is
/// part of the reuse-cache key.
pub(crate) trait ContentTransformer: Send + Sync {
    /// Stable description of the transformation for cache keying.
    fn spec(&self) -> &str;

    fn transform(
        &self,
        path: &[u8],
        keywords: Option<&[u8]>,
        info: &RevisionInfo<'_>,
        content: Vec<u8>,
    ) -> Vec<u8>;
}

/// Expands SVN keywords (`$Id$`, `$Revision$`, ...) the way a checkout
/// would, honoring the file's `svn:keywords` property. Only collapsed
/// keywords (`$Kw$`, `$Kw:: ... $`) are rewritten; text that already
/// carries an expansion is left alone.
pub(crate) struct KeywordExpander;

fn keyword_regex() -> &'static regex::bytes::Regex {
    static RE: OnceLock<regex::bytes::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::bytes::Regex::new(r"\$(\w+)(:: *)?\$").unwrap())
}

impl ContentTransformer for KeywordExpander {
    fn spec(&self) -> &str {
        "svn-keywords"
    }

    fn transform(
        &self,
        path: &[u8],
        keywords: Option<&[u8]>,
        info: &RevisionInfo<'_>,
        content: Vec<u8>,
    ) -> Vec<u8> {
        let Some(keywords) = keywords else {
            return content;
        };
        if content.is_empty() || !content.contains(&b'$') {
            return content;
        }

        let enabled: Vec<&[u8]> = keywords
            .split(|&c| c == b' ' || c == b'\n' || c == b'\t')
            .filter(|k| !k.is_empty())
            .collect();
        let has = |names: &[&[u8]]| names.iter().any(|n| enabled.contains(n));

        let expand = |kw: &[u8]| -> Option<Vec<u8>> {
            match kw {
                b"Date" | b"LastChangedDate" if has(&[b"Date", b"LastChangedDate"]) => {
                    let date = info.date?;
                    Some(
                        date.format("%Y-%m-%d %H:%M:%S +0000 (%a, %d %b %Y)")
                            .to_string()
                            .into_bytes(),
                    )
                }
                b"Revision" | b"Rev" | b"LastChangedRevision"
                    if has(&[b"Revision", b"Rev", b"LastChangedRevision"]) =>
                {
                    Some(info.rev.to_string().into_bytes())
                }
                b"Author" | b"LastChangedBy" if has(&[b"Author", b"LastChangedBy"]) => {
                    Some(info.author.to_vec())
                }
                b"Id" => {
                    let date = info
                        .date
                        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    let mut val = crate::tree::file_name(path).to_vec();
                    val.extend(format!(" {} {} ", info.rev, date).into_bytes());
                    val.extend(info.author);
                    Some(val)
                }
                b"Header" => {
                    let date = info
                        .date
                        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    let mut val = path.to_vec();
                    val.extend(format!(" {} {} ", info.rev, date).into_bytes());
                    val.extend(info.author);
                    Some(val)
                }
                _ => None,
            }
        };

        let result = keyword_regex().replace_all(&content, |caps: &regex::bytes::Captures<'_>| {
            let kw = caps.get(1).unwrap().as_bytes();
            let Some(val) = expand(kw) else {
                return caps.get(0).unwrap().as_bytes().to_vec();
            };

            match caps.get(2) {
                None => {
                    // "$Kw$" -> "$Kw: val $"
                    let mut out = Vec::new();
                    out.push(b'$');
                    out.extend(kw);
                    out.extend(b": ");
                    out.extend(&val);
                    out.extend(b" $");
                    out
                }
                Some(placeholder) => {
                    // "$Kw:: ... $" keeps its width; an overlong value is
                    // truncated with a '#' marker like svn does
                    let width = placeholder.len().saturating_sub(4);
                    let mut out = Vec::new();
                    out.push(b'$');
                    out.extend(kw);
                    out.extend(b":: ");
                    if val.len() > width {
                        if width > 0 {
                            out.extend(&val[..(width - 1)]);
                            out.push(b'#');
                        }
                    } else {
                        out.extend(&val);
                        out.resize(out.len() + (width - val.len()), b' ');
                    }
                    out.extend(b" $");
                    out
                }
            }
        });

        result.into_owned()
    }
}

/// Pass-through transformer used when keyword replacement is off; keeps
/// the pipeline shape and the cache-key spec uniform.
pub(crate) struct IdentityTransformer;

impl ContentTransformer for IdentityTransformer {
    fn spec(&self) -> &str {
        ""
    }

    fn transform(
        &self,
        _path: &[u8],
        _keywords: Option<&[u8]>,
        _info: &RevisionInfo<'_>,
        content: Vec<u8>,
    ) -> Vec<u8> {
        content
    }
}

/// Decorates a transformer's spec with configuration tags (e.g. the
/// reformatter switches) without changing its behavior, so the reuse
/// cache keys on the whole configuration.
pub(crate) struct SpecTagged {
    inner: Box<dyn ContentTransformer>,
    spec: String,
}

impl SpecTagged {
    pub(crate) fn new(inner: Box<dyn ContentTransformer>, tags: &[&str]) -> Self {
        let mut spec = inner.spec().to_string();
        for tag in tags {
            if !spec.is_empty() {
                spec.push('+');
            }
            spec.push_str(tag);
        }
        Self { inner, spec }
    }
}

impl ContentTransformer for SpecTagged {
    fn spec(&self) -> &str {
        &self.spec
    }

    fn transform(
        &self,
        path: &[u8],
        keywords: Option<&[u8]>,
        info: &RevisionInfo<'_>,
        content: Vec<u8>,
    ) -> Vec<u8> {
        self.inner.transform(path, keywords, info, content)
    }
}

/// Builds `.gitignore` content from `svn:ignore` (entries anchored to the
/// owning directory) and `svn:global-ignores` (entries matching at any
/// depth). Returns an empty buffer when there is nothing to ignore.
pub(crate) fn gitignore_content(
    ignores: Option<&[u8]>,
    global_ignores: Option<&[u8]>,
) -> Vec<u8> {
    let mut out = Vec::<u8>::new();

    let from_ignores = convert_ignore_lines(ignores, true);
    if !from_ignores.is_empty() {
        out.extend(b"# ignores from svn:ignore\n");
        out.extend(from_ignores);
    }

    let from_global = convert_ignore_lines(global_ignores, false);
    if !from_global.is_empty() {
        if !out.is_empty() {
            out.push(b'\n');
        }
        out.extend(b"# ignores from svn:global-ignores\n");
        out.extend(from_global);
    }

    out
}

fn convert_ignore_lines(value: Option<&[u8]>, anchored: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let Some(value) = value else {
        return out;
    };

    for line in value.split(|&c| c == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() || line.starts_with(b"#") {
            continue;
        }
        if anchored && !line.contains(&b'/') {
            out.push(b'/');
        }
        out.extend(line);
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{gitignore_content, ContentTransformer, KeywordExpander, RevisionInfo};

    fn info() -> RevisionInfo<'static> {
        RevisionInfo {
            rev: 42,
            author: b"alice",
            date: chrono::DateTime::from_timestamp(1_700_000_000, 0),
        }
    }

    #[test]
    fn expands_enabled_keywords() {
        let out = KeywordExpander.transform(
            b"src/a.c",
            Some(b"Revision Author"),
            &info(),
            b"// $Revision$ by $Author$\n".to_vec(),
        );
        assert_eq!(out, b"// $Revision: 42 $ by $Author: alice $\n");
    }

    #[test]
    fn disabled_keywords_stay_collapsed() {
        let out = KeywordExpander.transform(
            b"src/a.c",
            Some(b"Author"),
            &info(),
            b"$Revision$\n".to_vec(),
        );
        assert_eq!(out, b"$Revision$\n");
    }

    #[test]
    fn no_keywords_property_means_no_change() {
        let out = KeywordExpander.transform(b"a", None, &info(), b"$Revision$".to_vec());
        assert_eq!(out, b"$Revision$");
    }

    #[test]
    fn id_uses_file_name() {
        let out = KeywordExpander.transform(
            b"src/deep/file.c",
            Some(b"Id"),
            &info(),
            b"$Id$".to_vec(),
        );
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("$Id: file.c 42 "), "got {text:?}");
        assert!(text.ends_with("alice $"));
    }

    #[test]
    fn fixed_width_placeholder_keeps_width() {
        let input = b"$Revision::      $".to_vec();
        let out = KeywordExpander.transform(b"a", Some(b"Revision"), &info(), input.clone());
        assert_eq!(out.len(), input.len());
        assert!(out.starts_with(b"$Revision:: 42"));
    }

    #[test]
    fn gitignore_combines_both_sources() {
        let out = gitignore_content(Some(b"*.o\nbuild\n"), Some(b"*.tmp\n"));
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "# ignores from svn:ignore\n/*.o\n/build\n\n\
             # ignores from svn:global-ignores\n*.tmp\n",
        );
    }

    #[test]
    fn gitignore_empty_when_no_props() {
        assert!(gitignore_content(None, None).is_empty());
    }
}
