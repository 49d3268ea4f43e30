use quick_xml::events::Event;

#[derive(Debug)]
pub(crate) enum XmlError {
    Parse(quick_xml::Error),
    Attr(quick_xml::events::attributes::AttrError),
    UnbalancedTag,
    NoRootElement,
}

impl From<quick_xml::Error> for XmlError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<quick_xml::events::attributes::AttrError> for XmlError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Self::Attr(e)
    }
}

impl std::fmt::Display for XmlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "XML syntax error: {e}"),
            Self::Attr(e) => write!(f, "XML attribute error: {e}"),
            Self::UnbalancedTag => write!(f, "unbalanced XML tags"),
            Self::NoRootElement => write!(f, "no root element"),
        }
    }
}

/// One element of the configuration document. Children keep document
/// order; the rule resolution contract depends on it.
#[derive(Clone, Debug, Default)]
pub(crate) struct Element {
    pub(crate) name: String,
    pub(crate) attrs: Vec<(String, String)>,
    pub(crate) children: Vec<Element>,
    pub(crate) text: String,
    /// Set on children inherited from a `<Default>` section during merge.
    pub(crate) from_default: bool,
}

impl Element {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub(crate) fn children_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub(crate) fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

pub(crate) fn parse_document(raw: &str) -> Result<Element, XmlError> {
    let mut reader = quick_xml::Reader::from_str(raw);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(element_from_start(&start)?);
            }
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::UnbalancedTag)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| XmlError::Parse(quick_xml::Error::from(e)))?;
                    top.text.push_str(unescaped.trim());
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(data.as_ref()));
                }
            }
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(XmlError::UnbalancedTag);
    }
    root.ok_or(XmlError::NoRootElement)
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element, XmlError> {
    let mut element = Element::new(&String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Parse(quick_xml::Error::from(e)))?;
        element.attrs.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(element)
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(XmlError::UnbalancedTag);
    }
    Ok(())
}

/// Tags whose defaults are applied after the project's own rules; the
/// rest of a `<Default>` section merges in front so project declarations
/// override it.
const POST_RULE_TAGS: &[&str] = &[
    "MapPath",
    "UnmapPath",
    "EditMsg",
    "IgnoreFiles",
    "Chmod",
    "MapRef",
    "Replace",
];

/// Combines a `<Project>` (or `<Default>`) element with an inherited
/// `<Default>` element, preserving the resolution-order contract.
pub(crate) fn merge_with_default(node: &Element, default: &Element) -> Element {
    let mut merged = Element {
        name: node.name.clone(),
        attrs: node.attrs.clone(),
        children: Vec::with_capacity(node.children.len() + default.children.len()),
        text: node.text.clone(),
        from_default: node.from_default,
    };

    for child in default.children.iter() {
        if !POST_RULE_TAGS.contains(&child.name.as_str()) {
            let mut inherited = child.clone();
            inherited.from_default = true;
            merged.children.push(inherited);
        }
    }

    merged.children.extend(node.children.iter().cloned());

    for child in default.children.iter() {
        if POST_RULE_TAGS.contains(&child.name.as_str()) {
            let mut inherited = child.clone();
            inherited.from_default = true;
            merged.children.push(inherited);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::{merge_with_default, parse_document};

    #[test]
    fn parses_nested_elements_in_order() {
        let doc = parse_document(
            r#"<Projects>
                 <Default>
                   <Vars><Trunk>trunk</Trunk></Vars>
                 </Default>
                 <Project Name="p1" ExplicitOnly="Yes">
                   <MapPath>
                     <Path>**/trunk</Path>
                     <Refname>refs/heads/**/main</Refname>
                   </MapPath>
                   <MapPath><Path>**/branches/*</Path></MapPath>
                 </Project>
               </Projects>"#,
        )
        .unwrap();

        assert_eq!(doc.name, "Projects");
        let project = doc.child("Project").unwrap();
        assert_eq!(project.attr("Name"), Some("p1"));
        assert_eq!(project.attr("ExplicitOnly"), Some("Yes"));

        let maps: Vec<_> = project.children_named("MapPath").collect();
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0].child_text("Path"), Some("**/trunk"));
        assert_eq!(
            maps[0].child_text("Refname"),
            Some("refs/heads/**/main")
        );
    }

    #[test]
    fn parses_empty_elements_and_attrs() {
        let doc =
            parse_document(r#"<MapPath BlockParent="No"><Refname/></MapPath>"#).unwrap();
        assert_eq!(doc.attr("BlockParent"), Some("No"));
        assert_eq!(doc.child_text("Refname"), Some(""));
    }

    #[test]
    fn rejects_unbalanced_documents() {
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("").is_err());
    }

    #[test]
    fn merge_splits_pre_and_post_rules() {
        let project = parse_document(
            r#"<Project>
                 <Vars><X>1</X></Vars>
                 <MapPath><Path>own</Path></MapPath>
               </Project>"#,
        )
        .unwrap();
        let default = parse_document(
            r#"<Default>
                 <Vars><Y>2</Y></Vars>
                 <MapPath><Path>inherited</Path></MapPath>
               </Default>"#,
        )
        .unwrap();

        let merged = merge_with_default(&project, &default);
        let names: Vec<_> = merged
            .children
            .iter()
            .map(|c| (c.name.as_str(), c.from_default))
            .collect();
        assert_eq!(
            names,
            [
                ("Vars", true),
                ("Vars", false),
                ("MapPath", false),
                ("MapPath", true),
            ],
        );
    }
}
