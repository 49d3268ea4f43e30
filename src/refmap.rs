use crate::config::{expand_template, Config, MapRule, RecreateMerges};

/// Outcome of resolving an SVN directory path against the mapping rules.
pub(crate) enum PathLookup<'a> {
    /// No project or rule covers the path.
    Unmapped,
    /// An `<UnmapPath>`, an empty `<Refname/>`, or an implicit parent
    /// block claimed the path.
    Blocked,
    Mapped(MappedPath<'a>),
}

pub(crate) struct MappedPath<'a> {
    pub(crate) project: usize,
    pub(crate) rule: &'a MapRule,
    /// Length of the branch directory prefix within the looked-up path.
    pub(crate) branch_dir_len: usize,
    /// Fully transformed refname (template, `refs/` prefix, `<MapRef>`,
    /// `<Replace>`, legalization) before collision avoidance.
    pub(crate) refname: String,
    /// Revision-ref root for `--create-revision-refs`.
    pub(crate) revision_ref: String,
    pub(crate) add_tree_prefix: bool,
    pub(crate) recreate_merges: RecreateMerges,
}

pub(crate) struct RefMapper {
    config: Config,
}

impl RefMapper {
    pub(crate) fn new(config: Config) -> Self {
        Self { config }
    }

    #[inline]
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves a directory path to its owning branch mapping. `path` may
    /// be the branch directory itself or anything below it.
    pub(crate) fn resolve(&self, path: &[u8]) -> PathLookup<'_> {
        for (project_idx, project) in self.config.projects.iter().enumerate() {
            if !project.paths.is_empty() && !project.paths.accepts(path) {
                continue;
            }

            for rule in project.map_rules.iter() {
                if let Some(m) = rule.glob.match_dir(path) {
                    let Some(ref refname_template) = rule.refname else {
                        return PathLookup::Blocked;
                    };

                    let raw = expand_template(refname_template, &m.captures);
                    let mut refname = String::from_utf8_lossy(&raw).into_owned();
                    if !refname.starts_with("refs/") {
                        refname = format!("refs/{refname}");
                    }
                    if let Some(remapped) = project.remap_ref(&refname) {
                        refname = remapped;
                    }
                    refname = project.replace_chars(&refname);
                    refname = legalize_refname(&refname);

                    let revision_ref = match rule.revision_ref {
                        Some(ref template) => {
                            let raw = expand_template(template, &m.captures);
                            let mut r = String::from_utf8_lossy(&raw).into_owned();
                            if !r.starts_with("refs/") {
                                r = format!("refs/{r}");
                            }
                            legalize_refname(&r)
                        }
                        None => default_revision_ref(&refname),
                    };

                    return PathLookup::Mapped(MappedPath {
                        project: project_idx,
                        rule,
                        branch_dir_len: m.prefix_len,
                        refname,
                        revision_ref,
                        add_tree_prefix: rule.add_tree_prefix.unwrap_or(false),
                        recreate_merges: rule
                            .recreate_merges
                            .unwrap_or(project.recreate_merges),
                    });
                }

                if let Some(ref parent) = rule.parent_block {
                    if parent
                        .match_dir(path)
                        .is_some_and(|m| m.prefix_len == path.len())
                    {
                        return PathLookup::Blocked;
                    }
                }
            }
        }

        PathLookup::Unmapped
    }
}

fn default_revision_ref(refname: &str) -> String {
    if let Some(rest) = refname.strip_prefix("refs/heads/") {
        format!("refs/revisions/{rest}")
    } else if let Some(rest) = refname.strip_prefix("refs/") {
        format!("refs/revisions/{rest}")
    } else {
        format!("refs/revisions/{refname}")
    }
}

/// Collision-avoiding registry of final refnames. Claims are processed in
/// branch-creation order, so suffix assignment is deterministic.
pub(crate) struct RefRegistry {
    // sorted; binary search keeps claims cheap and iteration ordered
    used: Vec<String>,
}

impl RefRegistry {
    pub(crate) fn new() -> Self {
        Self { used: Vec::new() }
    }

    /// Claims `base` or, when taken (or path-prefix-conflicting with a
    /// taken name), the first free `base__<n>` starting at 2.
    pub(crate) fn claim(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut tries = 1u32;
        loop {
            match self.try_claim(&candidate) {
                Ok(()) => {
                    if candidate != base {
                        tracing::warn!(
                            "refname \"{}\" already in use, using \"{}\"",
                            base.escape_default(),
                            candidate.escape_default(),
                        );
                    }
                    return candidate;
                }
                Err(()) => {
                    tries += 1;
                    candidate = format!("{base}__{tries}");
                }
            }
        }
    }

    /// Frees a claimed name (a deleted branch no longer occupies its
    /// refname; the revived successor takes it over).
    pub(crate) fn release(&mut self, refname: &str) {
        if let Ok(i) = self.used.binary_search_by(|u| u.as_str().cmp(refname)) {
            self.used.remove(i);
        }
    }

    fn try_claim(&mut self, candidate: &str) -> Result<(), ()> {
        let i = match self.used.binary_search_by(|u| u.as_str().cmp(candidate)) {
            Ok(_) => return Err(()),
            Err(i) => i,
        };

        // git forbids a ref being a path prefix of another
        // ("a" and "a/b" cannot coexist)
        if self.used[i..]
            .first()
            .is_some_and(|next| strip_ref_prefix(next, candidate).is_some())
        {
            return Err(());
        }
        if self.used[..i]
            .iter()
            .rev()
            .any(|prev| strip_ref_prefix(candidate, prev).is_some())
        {
            return Err(());
        }

        self.used.insert(i, candidate.to_string());
        Ok(())
    }
}

fn strip_ref_prefix<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// Replaces bytes and sequences git refuses in refnames. The `refs/`
/// prefix and the component separators stay; everything else follows
/// git-check-ref-format rules.
pub(crate) fn legalize_refname(raw: &str) -> String {
    fn legalize_component(name: &mut String) {
        if name.ends_with(".lock") {
            name.truncate(name.len() - 5);
            name.push_str("_lock");
        } else if name.ends_with('.') {
            name.truncate(name.len() - 1);
            name.push('_');
        }
    }

    let (prefix, rest) = match raw.strip_prefix("refs/") {
        Some(rest) => ("refs/", rest),
        None => ("", raw),
    };

    let mut legal = String::with_capacity(raw.len());
    for chr in rest.chars() {
        if chr == '/' {
            if !legal.ends_with('/') && !legal.is_empty() {
                legalize_component(&mut legal);
                legal.push('/');
            }
        } else {
            let disallowed = matches!(
                chr,
                '\0'..=' ' | '*' | ':' | '?' | '[' | '\\' | ']' | '^' | '{' | '}' | '~'..
            );
            if disallowed
                || ((legal.ends_with('/') || legal.is_empty() || legal.ends_with('.'))
                    && chr == '.')
                || (legal.is_empty() && chr == '-')
            {
                legal.push('_');
            } else {
                legal.push(chr);
            }
        }
    }

    if legal.ends_with('/') {
        legal.truncate(legal.len() - 1);
    }
    legalize_component(&mut legal);
    if legal.is_empty() {
        legal.push('_');
    }

    format!("{prefix}{legal}")
}

#[cfg(test)]
mod tests {
    use super::{legalize_refname, PathLookup, RefMapper, RefRegistry};
    use crate::config::{Config, LoadOptions};

    fn default_mapper() -> RefMapper {
        RefMapper::new(Config::load(None, &LoadOptions::default()).unwrap())
    }

    fn resolve_refname(mapper: &RefMapper, path: &[u8]) -> Option<(String, usize)> {
        match mapper.resolve(path) {
            PathLookup::Mapped(m) => Some((m.refname, m.branch_dir_len)),
            _ => None,
        }
    }

    #[test]
    fn trunk_maps_to_main() {
        let mapper = default_mapper();
        let (refname, len) = resolve_refname(&mapper, b"trunk").unwrap();
        assert_eq!(refname, "refs/heads/main");
        assert_eq!(len, 5);

        let (refname, len) = resolve_refname(&mapper, b"proj/trunk/src/a.c").unwrap();
        assert_eq!(refname, "refs/heads/proj/main");
        assert_eq!(len, b"proj/trunk".len());
    }

    #[test]
    fn branches_and_tags_map() {
        let mapper = default_mapper();
        assert_eq!(
            resolve_refname(&mapper, b"branches/feat").unwrap().0,
            "refs/heads/feat",
        );
        assert_eq!(
            resolve_refname(&mapper, b"tags/v1.0").unwrap().0,
            "refs/tags/v1.0",
        );
    }

    #[test]
    fn user_branches_map_and_container_blocks() {
        let mapper = default_mapper();
        assert_eq!(
            resolve_refname(&mapper, b"Proj1/users/branches/alice/x")
                .unwrap()
                .0,
            "refs/heads/Proj1/users/alice/x",
        );
        // the per-user container itself maps to nothing
        assert!(matches!(
            mapper.resolve(b"users/branches/alice"),
            PathLookup::Blocked
        ));
    }

    #[test]
    fn branch_container_is_blocked() {
        let mapper = default_mapper();
        assert!(matches!(mapper.resolve(b"branches"), PathLookup::Blocked));
        assert!(matches!(mapper.resolve(b"proj/tags"), PathLookup::Blocked));
        assert!(matches!(mapper.resolve(b"unrelated"), PathLookup::Unmapped));
    }

    #[test]
    fn replace_rules_fix_awkward_names() {
        let mapper = default_mapper();
        assert_eq!(
            resolve_refname(&mapper, b"branches/feat x:1").unwrap().0,
            "refs/heads/feat_x.1",
        );
    }

    #[test]
    fn registry_appends_numeric_suffixes() {
        let mut registry = RefRegistry::new();
        assert_eq!(registry.claim("refs/heads/b"), "refs/heads/b");
        assert_eq!(registry.claim("refs/heads/b"), "refs/heads/b__2");
        assert_eq!(registry.claim("refs/heads/b"), "refs/heads/b__3");
    }

    #[test]
    fn released_names_are_reclaimable() {
        let mut registry = RefRegistry::new();
        assert_eq!(registry.claim("refs/heads/b"), "refs/heads/b");
        registry.release("refs/heads/b");
        assert_eq!(registry.claim("refs/heads/b"), "refs/heads/b");
    }

    #[test]
    fn registry_rejects_prefix_conflicts() {
        let mut registry = RefRegistry::new();
        assert_eq!(registry.claim("refs/heads/a"), "refs/heads/a");
        assert_eq!(registry.claim("refs/heads/a/b"), "refs/heads/a/b__2");

        let mut registry = RefRegistry::new();
        assert_eq!(registry.claim("refs/heads/x/y"), "refs/heads/x/y");
        assert_eq!(registry.claim("refs/heads/x"), "refs/heads/x__2");
    }

    #[test]
    fn legalization_rewrites_forbidden_sequences() {
        assert_eq!(legalize_refname("refs/heads/a b"), "refs/heads/a_b");
        assert_eq!(legalize_refname("refs/heads/a..b"), "refs/heads/a._b");
        assert_eq!(legalize_refname("refs/heads/x.lock"), "refs/heads/x_lock");
        assert_eq!(legalize_refname("refs/heads/end."), "refs/heads/end_");
        assert_eq!(legalize_refname("refs/heads//x"), "refs/heads/x");
        assert_eq!(legalize_refname("refs/heads/.hidden"), "refs/heads/_hidden");
    }
}
