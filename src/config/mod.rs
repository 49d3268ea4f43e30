use std::collections::HashMap;

pub(crate) mod glob;
mod xml;

pub(crate) use glob::{expand_template, Glob, GlobError, GlobList, MatchMode};

use crate::svn::mergeinfo::RevRanges;

#[derive(Debug)]
pub(crate) enum ConfigError {
    Xml(xml::XmlError),
    BadRoot { found: String },
    Glob { pattern: String, error: GlobError },
    BadBool { attr: String, value: String },
    BadRevs { value: String },
    BadRegex { pattern: String, error: Box<regex::Error> },
    VarCycle { name: String },
    MissingPath { element: &'static str },
    DuplicateProject { name: String },
    DuplicateMapPath { pattern: String },
    NeedsProject { project: String, needs: String },
    NoProjectSelected,
}

impl From<xml::XmlError> for ConfigError {
    fn from(e: xml::XmlError) -> Self {
        Self::Xml(e)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Xml(e) => e.fmt(f),
            Self::BadRoot { found } => {
                write!(f, "config root element must be <Projects>, found <{found}>")
            }
            Self::Glob { pattern, error } => write!(f, "invalid glob \"{pattern}\": {error}"),
            Self::BadBool { attr, value } => {
                write!(f, "invalid boolean {attr}=\"{value}\"")
            }
            Self::BadRevs { value } => write!(f, "invalid revision list \"{value}\""),
            Self::BadRegex { pattern, error } => {
                write!(f, "invalid regular expression \"{pattern}\": {error}")
            }
            Self::VarCycle { name } => {
                write!(f, "variable \"{name}\" expands through itself")
            }
            Self::MissingPath { element } => write!(f, "missing <Path> in <{element}>"),
            Self::DuplicateProject { name } => {
                write!(f, "project \"{name}\" declared twice")
            }
            Self::DuplicateMapPath { pattern } => {
                write!(f, "directory mapping \"{pattern}\" declared twice")
            }
            Self::NeedsProject { project, needs } => write!(
                f,
                "project \"{project}\" needs project \"{needs}\", which is not active"
            ),
            Self::NoProjectSelected => write!(f, "no project matches the selection"),
        }
    }
}

fn parse_bool(attr: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "Yes" | "yes" | "True" | "true" => Ok(true),
        "0" | "No" | "no" | "False" | "false" => Ok(false),
        _ => Err(ConfigError::BadBool {
            attr: attr.to_string(),
            value: value.to_string(),
        }),
    }
}

fn attr_bool(element: &xml::Element, name: &str, default: bool) -> Result<bool, ConfigError> {
    element
        .attr(name)
        .map(|v| parse_bool(name, v))
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// "42", "10-20,33" and the like, as used by `Revs` attributes.
fn parse_revs(value: &str) -> Result<RevRanges, ConfigError> {
    let mut ranges = RevRanges::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (raw_start, raw_end) = match part.split_once('-') {
            Some((a, b)) => (a, b),
            None => (part, part),
        };
        match (raw_start.trim().parse::<u64>(), raw_end.trim().parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end => ranges.add(start, end, true),
            _ => {
                return Err(ConfigError::BadRevs {
                    value: value.to_string(),
                })
            }
        }
    }
    Ok(ranges)
}

/// Which merge-parent categories may become real parent edges.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RecreateMerges {
    pub(crate) branch_merge: bool,
    pub(crate) file_merge: bool,
    pub(crate) dir_copy: bool,
    pub(crate) file_copy: bool,
}

impl Default for RecreateMerges {
    fn default() -> Self {
        Self {
            branch_merge: true,
            file_merge: false,
            dir_copy: false,
            file_copy: false,
        }
    }
}

impl RecreateMerges {
    fn parse(element: &xml::Element) -> Result<Self, ConfigError> {
        let base = Self::default();
        Ok(Self {
            branch_merge: attr_bool(element, "Branch", base.branch_merge)?,
            file_merge: attr_bool(element, "File", base.file_merge)?,
            dir_copy: attr_bool(element, "DirCopy", base.dir_copy)?,
            file_copy: attr_bool(element, "FileCopy", base.file_copy)?,
        })
    }
}

pub(crate) struct MapRule {
    pub(crate) glob: Glob,
    /// Glob matching only the pattern's parent directory, when the
    /// pattern implicitly blocks it ("branches/" itself is not a branch).
    pub(crate) parent_block: Option<Glob>,
    /// `None` blocks matched directories (explicit `<UnmapPath>` or an
    /// empty `<Refname/>`).
    pub(crate) refname: Option<String>,
    pub(crate) revision_ref: Option<String>,
    pub(crate) add_tree_prefix: Option<bool>,
    pub(crate) inherit_mergeinfo: bool,
    pub(crate) recreate_merges: Option<RecreateMerges>,
    pub(crate) edit_msgs: Vec<EditMsgRule>,
    pub(crate) from_default: bool,
}

pub(crate) struct EditMsgRule {
    pub(crate) pattern: regex::bytes::Regex,
    pub(crate) replace: Vec<u8>,
    pub(crate) is_final: bool,
    pub(crate) revs: Option<RevRanges>,
}

impl EditMsgRule {
    fn parse(element: &xml::Element, vars: &Vars) -> Result<Self, ConfigError> {
        let raw_pattern = element.child_text("Match").unwrap_or_default();
        let raw_pattern = vars.expand_text(raw_pattern);
        let pattern = regex::bytes::RegexBuilder::new(&raw_pattern)
            .multi_line(true)
            .build()
            .map_err(|e| ConfigError::BadRegex {
                pattern: raw_pattern.clone(),
                error: Box::new(e),
            })?;

        Ok(Self {
            pattern,
            replace: vars
                .expand_text(element.child_text("Replace").unwrap_or_default())
                .into_bytes(),
            is_final: attr_bool(element, "Final", false)?,
            revs: element.attr("Revs").map(parse_revs).transpose()?,
        })
    }

    pub(crate) fn applies_at(&self, rev: u64) -> bool {
        self.revs.as_ref().map_or(true, |revs| revs.contains(rev))
    }
}

pub(crate) struct ChmodRule {
    pub(crate) paths: GlobList,
    pub(crate) executable: bool,
}

/// Refname remapping, exact or single-`*` prefix pair.
pub(crate) struct MapRefRule {
    pub(crate) from: String,
    pub(crate) to: String,
    pub(crate) is_prefix: bool,
}

impl MapRefRule {
    pub(crate) fn apply(&self, refname: &str) -> Option<String> {
        if self.is_prefix {
            refname
                .strip_prefix(&self.from)
                .map(|rest| format!("{}{rest}", self.to))
        } else {
            (refname == self.from).then(|| self.to.clone())
        }
    }
}

/// `<InjectFile>`/`<AddFile>`/`<DeletePath>` in document order; the order
/// breaks add/delete ties at the same revision.
pub(crate) enum TreeEdit {
    Inject {
        branch: Option<Glob>,
        path: Vec<u8>,
        data: Vec<u8>,
        executable: bool,
        revs: Option<RevRanges>,
    },
    Delete {
        paths: GlobList,
        revs: Option<RevRanges>,
    },
}

pub(crate) struct Project {
    pub(crate) name: String,
    pub(crate) paths: GlobList,
    pub(crate) map_rules: Vec<MapRule>,
    pub(crate) edit_msgs: Vec<EditMsgRule>,
    pub(crate) ignore_files: GlobList,
    pub(crate) chmods: Vec<ChmodRule>,
    pub(crate) map_refs: Vec<MapRefRule>,
    pub(crate) replacements: Vec<(String, String)>,
    pub(crate) tree_edits: Vec<TreeEdit>,
    pub(crate) skip_commit_revs: RevRanges,
    pub(crate) empty_dir_placeholder: Option<(Vec<u8>, Vec<u8>)>,
    pub(crate) recreate_merges: RecreateMerges,
    pub(crate) ignore_unmerged: GlobList,
    pub(crate) inherit_mergeinfo: bool,
}

impl Project {
    /// Applies the project's `<Replace>` character substitutions to a
    /// refname.
    pub(crate) fn replace_chars(&self, refname: &str) -> String {
        let mut result = refname.to_string();
        for (chars, with) in self.replacements.iter() {
            result = result.replace(chars.as_str(), with);
        }
        result
    }

    pub(crate) fn remap_ref(&self, refname: &str) -> Option<String> {
        self.map_refs.iter().find_map(|rule| rule.apply(refname))
    }
}

pub(crate) struct Config {
    pub(crate) projects: Vec<Project>,
}

/// Knobs the command line feeds into config loading.
pub(crate) struct LoadOptions {
    pub(crate) trunk: String,
    pub(crate) branches: String,
    pub(crate) user_branches: Vec<String>,
    pub(crate) tags: String,
    pub(crate) map_trunk_to: String,
    pub(crate) use_default_config: bool,
    pub(crate) project_filter: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            trunk: "trunk".into(),
            branches: "branches".into(),
            user_branches: vec!["users/branches".into(), "branches/users".into()],
            tags: "tags".into(),
            map_trunk_to: "main".into(),
            use_default_config: true,
            project_filter: Vec::new(),
        }
    }
}

impl Config {
    pub(crate) fn load(xml_text: Option<&str>, opts: &LoadOptions) -> Result<Self, ConfigError> {
        let builtin = builtin_default(opts);
        let builtin = xml::parse_document(&builtin)?;

        let mut projects = Vec::new();
        let mut names = Vec::<String>::new();

        if let Some(xml_text) = xml_text {
            let root = xml::parse_document(xml_text)?;
            if root.name != "Projects" {
                return Err(ConfigError::BadRoot {
                    found: root.name.clone(),
                });
            }

            let user_default = root.child("Default").cloned().unwrap_or_else(|| {
                let mut d = xml::Element::new("Default");
                d.from_default = true;
                d
            });

            for node in root.children_named("Project") {
                let mut merged = xml::merge_with_default(node, &user_default);
                if opts.use_default_config
                    && attr_bool(node, "InheritDefaultMappings", true)?
                {
                    merged = xml::merge_with_default(&merged, &builtin);
                }

                let project = Project::from_element(&merged)?;
                if names.contains(&project.name) {
                    return Err(ConfigError::DuplicateProject { name: project.name });
                }
                names.push(project.name.clone());
                projects.push((node.clone(), project));
            }

            if projects.is_empty() {
                let merged = if opts.use_default_config {
                    xml::merge_with_default(&user_default, &builtin)
                } else {
                    user_default
                };
                projects.push((xml::Element::new("Project"), Project::from_element(&merged)?));
            }
        } else {
            projects.push((
                xml::Element::new("Project"),
                Project::from_element(&builtin)?,
            ));
        }

        // --project selection; ExplicitOnly projects are inert unless named
        let filter = if opts.project_filter.is_empty() {
            None
        } else {
            let mut list = GlobList::empty();
            for raw in opts.project_filter.iter() {
                list.extend(raw, MatchMode::Exact)
                    .map_err(|(pattern, error)| ConfigError::Glob { pattern, error })?;
            }
            Some(list)
        };

        let mut active = Vec::new();
        for (node, project) in projects.into_iter() {
            let explicit_only = attr_bool(&node, "ExplicitOnly", false)?;
            let selected = match filter {
                Some(ref filter) => filter.is_match(project.name.as_bytes()),
                None => !explicit_only,
            };
            if selected {
                active.push((node, project));
            }
        }
        if active.is_empty() {
            return Err(ConfigError::NoProjectSelected);
        }

        for (node, project) in active.iter() {
            if let Some(needs) = node.attr("NeedsProjects") {
                for needed in needs.split(';').filter(|s| !s.is_empty()) {
                    if !active.iter().any(|(_, p)| p.name == needed) {
                        return Err(ConfigError::NeedsProject {
                            project: project.name.clone(),
                            needs: needed.to_string(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            projects: active.into_iter().map(|(_, p)| p).collect(),
        })
    }
}

impl Project {
    fn from_element(element: &xml::Element) -> Result<Self, ConfigError> {
        let name = element.attr("Name").unwrap_or_default().to_string();

        let vars = Vars::resolve(element)?;

        let mut paths = GlobList::empty();
        let raw_paths = element.attr("Path").unwrap_or(name.as_str());
        if !raw_paths.is_empty() {
            paths
                .extend(&vars.expand_glob(raw_paths), MatchMode::DirPrefix)
                .map_err(|(pattern, error)| ConfigError::Glob { pattern, error })?;
        }

        let mut project = Self {
            name,
            paths,
            map_rules: Vec::new(),
            edit_msgs: Vec::new(),
            ignore_files: GlobList::empty(),
            chmods: Vec::new(),
            map_refs: Vec::new(),
            replacements: Vec::new(),
            tree_edits: Vec::new(),
            skip_commit_revs: RevRanges::new(),
            empty_dir_placeholder: None,
            recreate_merges: RecreateMerges::default(),
            ignore_unmerged: GlobList::empty(),
            inherit_mergeinfo: attr_bool(element, "InheritMergeinfo", true)?,
        };

        let mut seen_map_patterns = Vec::<String>::new();

        for child in element.children.iter() {
            match child.name.as_str() {
                "Vars" => {}
                "MapPath" | "UnmapPath" => {
                    let rule = MapRule::parse(child, &vars)?;
                    if seen_map_patterns.contains(&rule.glob.pattern().to_string()) {
                        // an inherited duplicate loses silently, a user
                        // duplicate is a config mistake
                        if child.from_default {
                            continue;
                        }
                        return Err(ConfigError::DuplicateMapPath {
                            pattern: rule.glob.pattern().to_string(),
                        });
                    }
                    seen_map_patterns.push(rule.glob.pattern().to_string());
                    project.map_rules.push(rule);
                }
                "EditMsg" => project.edit_msgs.push(EditMsgRule::parse(child, &vars)?),
                "IgnoreFiles" => {
                    project
                        .ignore_files
                        .extend(&vars.expand_glob(&child.text), MatchMode::FilePath)
                        .map_err(|(pattern, error)| ConfigError::Glob { pattern, error })?;
                }
                "Chmod" => {
                    let raw = child.child_text("Path").unwrap_or(child.text.as_str());
                    let executable = match child.attr("Mode") {
                        Some("755") | Some("+x") | None => true,
                        Some("644") | Some("-x") => false,
                        Some(other) => {
                            return Err(ConfigError::BadBool {
                                attr: "Mode".into(),
                                value: other.to_string(),
                            })
                        }
                    };
                    project.chmods.push(ChmodRule {
                        paths: GlobList::parse(&vars.expand_glob(raw), MatchMode::FilePath)
                            .map_err(|(pattern, error)| ConfigError::Glob { pattern, error })?,
                        executable,
                    });
                }
                "MapRef" => {
                    let from = vars.expand_text(child.child_text("Ref").unwrap_or_default());
                    let to = vars.expand_text(child.child_text("NewRef").unwrap_or_default());
                    let is_prefix = from.ends_with('*');
                    project.map_refs.push(MapRefRule {
                        from: from.trim_end_matches('*').to_string(),
                        to: to.trim_end_matches('*').to_string(),
                        is_prefix,
                    });
                }
                "Replace" => {
                    let chars = child.child_text("Chars").unwrap_or_default();
                    if let Some(with) = child.child_text("With") {
                        if !chars.is_empty() {
                            project
                                .replacements
                                .push((chars.to_string(), with.to_string()));
                        }
                    }
                }
                "InjectFile" | "AddFile" => {
                    let path = child
                        .child_text("Path")
                        .filter(|p| !p.is_empty())
                        .ok_or(ConfigError::MissingPath {
                            element: "InjectFile",
                        })?;
                    let branch = child
                        .attr("Branch")
                        .map(|raw| {
                            Glob::compile(&vars.expand_glob(raw), MatchMode::DirPrefix).map_err(
                                |error| ConfigError::Glob {
                                    pattern: raw.to_string(),
                                    error,
                                },
                            )
                        })
                        .transpose()?;
                    project.tree_edits.push(TreeEdit::Inject {
                        branch,
                        path: path.as_bytes().to_vec(),
                        data: child
                            .child_text("Data")
                            .unwrap_or_default()
                            .as_bytes()
                            .to_vec(),
                        executable: attr_bool(child, "Executable", false)?,
                        revs: child.attr("Revs").map(parse_revs).transpose()?,
                    });
                }
                "DeletePath" => {
                    let raw = child.child_text("Path").unwrap_or(child.text.as_str());
                    project.tree_edits.push(TreeEdit::Delete {
                        paths: GlobList::parse(&vars.expand_glob(raw), MatchMode::FilePath)
                            .map_err(|(pattern, error)| ConfigError::Glob { pattern, error })?,
                        revs: child.attr("Revs").map(parse_revs).transpose()?,
                    });
                }
                "SkipCommit" => {
                    if let Some(raw) = child.attr("Revs") {
                        let revs = parse_revs(raw)?;
                        project.skip_commit_revs.union(&revs);
                    }
                }
                "EmptyDirPlaceholder" => {
                    let file_name = child.attr("Name").unwrap_or(".gitkeep");
                    let content = child.attr("Content").unwrap_or_default();
                    project.empty_dir_placeholder = Some((
                        file_name.as_bytes().to_vec(),
                        content.as_bytes().to_vec(),
                    ));
                }
                "RecreateMerges" => {
                    project.recreate_merges = RecreateMerges::parse(child)?;
                }
                "IgnoreUnmerged" => {
                    project
                        .ignore_unmerged
                        .extend(&vars.expand_glob(&child.text), MatchMode::FilePath)
                        .map_err(|(pattern, error)| ConfigError::Glob { pattern, error })?;
                }
                other => {
                    if !child.from_default {
                        tracing::warn!("unrecognized config element <{other}>");
                    }
                }
            }
        }

        Ok(project)
    }
}

impl MapRule {
    fn parse(element: &xml::Element, vars: &Vars) -> Result<Self, ConfigError> {
        let raw_path = element
            .child_text("Path")
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingPath { element: "MapPath" })?;
        let pattern = vars.expand_glob(raw_path);

        let glob = Glob::compile(&pattern, MatchMode::DirPrefix).map_err(|error| {
            ConfigError::Glob {
                pattern: pattern.clone(),
                error,
            }
        })?;

        // "branches/*" makes "branches" itself unmappable
        let parent_block = if attr_bool(element, "BlockParent", true)? {
            pattern.strip_suffix("/*").map(|parent| {
                Glob::compile(parent, MatchMode::DirPrefix).map_err(|error| ConfigError::Glob {
                    pattern: parent.to_string(),
                    error,
                })
            })
        } else {
            None
        }
        .transpose()?;

        let refname = if element.name == "UnmapPath" {
            None
        } else {
            element
                .child_text("Refname")
                .filter(|r| !r.is_empty())
                .map(|r| vars.expand_text(r))
        };

        let mut edit_msgs = Vec::new();
        for child in element.children_named("EditMsg") {
            edit_msgs.push(EditMsgRule::parse(child, vars)?);
        }

        Ok(Self {
            glob,
            parent_block,
            refname,
            revision_ref: element
                .child_text("RevisionRef")
                .filter(|r| !r.is_empty())
                .map(|r| vars.expand_text(r)),
            add_tree_prefix: element
                .attr("AddTreePrefix")
                .map(|v| parse_bool("AddTreePrefix", v))
                .transpose()?,
            inherit_mergeinfo: attr_bool(element, "InheritMergeinfo", true)?,
            recreate_merges: element
                .child("RecreateMerges")
                .map(RecreateMerges::parse)
                .transpose()?,
            edit_msgs,
            from_default: element.from_default,
        })
    }
}

/// The `<Vars>` tables of a project, fully resolved. Values are lists
/// (split on ';'); a list interpolates into a glob as an alternation.
struct Vars {
    values: HashMap<String, Vec<String>>,
}

impl Vars {
    fn resolve(element: &xml::Element) -> Result<Self, ConfigError> {
        let mut raw = HashMap::<String, String>::new();
        for vars_node in element.children_named("Vars") {
            for var in vars_node.children.iter() {
                // later assignment wins, defaults merge in front
                raw.insert(var.name.clone(), var.text.clone());
            }
        }

        let mut resolved = HashMap::new();
        for name in raw.keys() {
            let mut visiting = Vec::new();
            Self::resolve_one(name, &raw, &mut resolved, &mut visiting)?;
        }

        Ok(Self { values: resolved })
    }

    fn resolve_one(
        name: &str,
        raw: &HashMap<String, String>,
        resolved: &mut HashMap<String, Vec<String>>,
        visiting: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        if resolved.contains_key(name) {
            return Ok(());
        }
        if visiting.iter().any(|v| v == name) {
            return Err(ConfigError::VarCycle {
                name: name.to_string(),
            });
        }
        visiting.push(name.to_string());

        let value = raw.get(name).cloned().unwrap_or_default();
        let mut expanded = String::new();
        let mut rem = value.as_str();
        while let Some((before, var_name, after)) = split_var(rem) {
            expanded.push_str(before);
            if raw.contains_key(var_name) {
                Self::resolve_one(var_name, raw, resolved, visiting)?;
                expanded.push_str(&resolved[var_name].join(";"));
            } else {
                // unresolved references stay as written
                expanded.push('$');
                expanded.push_str(var_name);
            }
            rem = after;
        }
        expanded.push_str(rem);

        visiting.pop();
        resolved.insert(
            name.to_string(),
            expanded.split(';').map(str::to_string).collect(),
        );
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Vec<String>> {
        self.values.get(name)
    }

    /// Substitution into a glob pattern; list values become `{a,b}`.
    fn expand_glob(&self, src: &str) -> String {
        self.expand_with(src, |values| {
            if values.len() == 1 {
                values[0].clone()
            } else {
                format!("{{{}}}", values.join(","))
            }
        })
    }

    /// Substitution into plain text (refname templates, regex sources);
    /// list values cannot be used here.
    fn expand_text(&self, src: &str) -> String {
        self.expand_with(src, |values| {
            if values.len() == 1 {
                values[0].clone()
            } else {
                tracing::warn!(
                    "list-valued variable cannot be substituted into text: {values:?}"
                );
                String::new()
            }
        })
    }

    fn expand_with(&self, src: &str, subst: impl Fn(&Vec<String>) -> String) -> String {
        let mut out = String::with_capacity(src.len());
        let mut rem = src;
        while let Some((before, name, after)) = split_var(rem) {
            out.push_str(before);
            match self.lookup(name) {
                Some(values) => out.push_str(&subst(values)),
                None => {
                    out.push('$');
                    out.push_str(name);
                }
            }
            rem = after;
        }
        out.push_str(rem);
        out
    }
}

/// Splits off the first `$name`, `${name}` or `$(name)` reference.
/// Returns (text before, variable name, text after). `$1`..`$9` are
/// capture references, not variables, and are skipped.
fn split_var(src: &str) -> Option<(&str, &str, &str)> {
    let bytes = src.as_bytes();
    let mut i = 0;
    while let Some(dollar) = src[i..].find('$').map(|p| p + i) {
        let rest = &bytes[(dollar + 1)..];
        match rest.first() {
            Some(&open @ (b'{' | b'(')) => {
                let close = if open == b'{' { b'}' } else { b')' };
                if let Some(end) = rest.iter().position(|&c| c == close) {
                    let name = &src[(dollar + 2)..(dollar + 1 + end)];
                    return Some((&src[..dollar], name, &src[(dollar + 2 + end)..]));
                }
                i = dollar + 1;
            }
            Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {
                let len = rest
                    .iter()
                    .position(|c| !c.is_ascii_alphanumeric() && *c != b'_')
                    .unwrap_or(rest.len());
                let name = &src[(dollar + 1)..(dollar + 1 + len)];
                return Some((&src[..dollar], name, &src[(dollar + 1 + len)..]));
            }
            _ => i = dollar + 1,
        }
        if i >= src.len() {
            break;
        }
    }
    None
}

fn builtin_default(opts: &LoadOptions) -> String {
    format!(
        r#"<Default>
	<Vars>
		<Trunk>{trunk}</Trunk>
		<Branches>{branches}</Branches>
		<UserBranches>{user_branches}</UserBranches>
		<Tags>{tags}</Tags>
		<MapTrunkTo>{map_trunk_to}</MapTrunkTo>
	</Vars>
	<MapPath>
		<Path>**/$UserBranches/*/*</Path>
		<Refname>refs/heads/**/users/*/*</Refname>
	</MapPath>
	<MapPath>
		<Path>**/$UserBranches/*</Path>
		<Refname />
	</MapPath>
	<MapPath>
		<Path>**/$Branches/*</Path>
		<Refname>refs/heads/**/*</Refname>
	</MapPath>
	<MapPath>
		<Path>**/$Tags/*</Path>
		<Refname>refs/tags/**/*</Refname>
	</MapPath>
	<MapPath>
		<Path>**/$Trunk</Path>
		<Refname>refs/heads/**/$MapTrunkTo</Refname>
	</MapPath>
	<Replace>
		<Chars> </Chars>
		<With>_</With>
	</Replace>
	<Replace>
		<Chars>:</Chars>
		<With>.</With>
	</Replace>
	<Replace>
		<Chars>^</Chars>
		<With>+</With>
	</Replace>
</Default>"#,
        trunk = opts.trunk,
        branches = opts.branches,
        user_branches = opts.user_branches.join(";"),
        tags = opts.tags,
        map_trunk_to = opts.map_trunk_to,
    )
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError, LoadOptions, TreeEdit};

    fn default_config() -> Config {
        Config::load(None, &LoadOptions::default()).unwrap()
    }

    #[test]
    fn builtin_defaults_have_standard_rules() {
        let config = default_config();
        assert_eq!(config.projects.len(), 1);

        let project = &config.projects[0];
        assert_eq!(project.map_rules.len(), 5);
        assert_eq!(project.replacements.len(), 3);
        assert_eq!(project.replace_chars("feat x:1^2"), "feat_x.1+2");
    }

    #[test]
    fn user_rules_come_before_defaults() {
        let config = Config::load(
            Some(
                r#"<Projects>
                     <Project Name="p">
                       <MapPath>
                         <Path>releases/*</Path>
                         <Refname>refs/heads/release/*</Refname>
                       </MapPath>
                     </Project>
                   </Projects>"#,
            ),
            &LoadOptions::default(),
        )
        .unwrap();

        let project = &config.projects[0];
        assert_eq!(project.map_rules.len(), 6);
        assert!(!project.map_rules[0].from_default);
        assert_eq!(project.map_rules[0].glob.pattern(), "releases/*");
        assert!(project.map_rules[1..].iter().all(|r| r.from_default));
    }

    #[test]
    fn explicit_only_projects_are_inert() {
        let xml = r#"<Projects>
                       <Project Name="a" />
                       <Project Name="b" ExplicitOnly="Yes" />
                     </Projects>"#;

        let config = Config::load(Some(xml), &LoadOptions::default()).unwrap();
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].name, "a");

        let opts = LoadOptions {
            project_filter: vec!["b".into()],
            ..LoadOptions::default()
        };
        let config = Config::load(Some(xml), &opts).unwrap();
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].name, "b");
    }

    #[test]
    fn needs_projects_enforced() {
        let xml = r#"<Projects>
                       <Project Name="a" NeedsProjects="b" />
                       <Project Name="b" ExplicitOnly="Yes" />
                     </Projects>"#;
        assert!(matches!(
            Config::load(Some(xml), &LoadOptions::default()),
            Err(ConfigError::NeedsProject { .. })
        ));
    }

    #[test]
    fn variable_cycle_fails() {
        let xml = r#"<Projects>
                       <Project Name="p">
                         <Vars><A>$B</A><B>$A</B></Vars>
                       </Project>
                     </Projects>"#;
        assert!(matches!(
            Config::load(Some(xml), &LoadOptions::default()),
            Err(ConfigError::VarCycle { .. })
        ));
    }

    #[test]
    fn list_variable_becomes_alternation() {
        let config = default_config();
        let project = &config.projects[0];

        // $UserBranches = users/branches;branches/users feeds the first rule
        let rule = &project.map_rules[0];
        assert!(rule.glob.match_dir(b"users/branches/alice/x").is_some());
        assert!(rule.glob.match_dir(b"branches/users/bob/y").is_some());
        assert!(rule.glob.match_dir(b"branches/feat").is_none());
    }

    #[test]
    fn duplicate_user_mapping_fails() {
        let xml = r#"<Projects>
                       <Project Name="p">
                         <MapPath><Path>x/*</Path><Refname>refs/heads/*</Refname></MapPath>
                         <MapPath><Path>x/*</Path><Refname>refs/heads/y/*</Refname></MapPath>
                       </Project>
                     </Projects>"#;
        assert!(matches!(
            Config::load(Some(xml), &LoadOptions::default()),
            Err(ConfigError::DuplicateMapPath { .. })
        ));
    }

    #[test]
    fn tree_edits_keep_document_order() {
        let xml = r#"<Projects>
                       <Project Name="p">
                         <AddFile><Path>VERSION</Path><Data>1.0</Data></AddFile>
                         <DeletePath><Path>VERSION</Path></DeletePath>
                       </Project>
                     </Projects>"#;
        let config = Config::load(Some(xml), &LoadOptions::default()).unwrap();
        let edits = &config.projects[0].tree_edits;
        assert_eq!(edits.len(), 2);
        assert!(matches!(edits[0], TreeEdit::Inject { .. }));
        assert!(matches!(edits[1], TreeEdit::Delete { .. }));
    }

    #[test]
    fn skip_commit_revs_parse() {
        let xml = r#"<Projects>
                       <Project Name="p">
                         <SkipCommit Revs="42" />
                         <SkipCommit Revs="100-110,115" />
                       </Project>
                     </Projects>"#;
        let config = Config::load(Some(xml), &LoadOptions::default()).unwrap();
        let revs = &config.projects[0].skip_commit_revs;
        assert!(revs.contains(42));
        assert!(revs.contains(105));
        assert!(revs.contains(115));
        assert!(!revs.contains(43));
    }
}
