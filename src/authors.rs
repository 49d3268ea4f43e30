use std::collections::HashMap;

/// The authors map: a JSON object of `{"username": {"Name": ..,
/// "Email": ..}}`. Usernames missing from the map fall back to
/// `username <username@localhost>`.
pub(crate) struct AuthorsMap {
    map: HashMap<String, Author>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub(crate) struct Author {
    #[serde(rename = "Name")]
    pub(crate) name: String,
    #[serde(rename = "Email")]
    pub(crate) email: String,
}

#[derive(Debug)]
pub(crate) enum AuthorsMapError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl From<std::io::Error> for AuthorsMapError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for AuthorsMapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => write!(f, "bad authors map: {e}"),
        }
    }
}

impl AuthorsMap {
    pub(crate) fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub(crate) fn parse(src: &mut dyn std::io::Read) -> Result<Self, AuthorsMapError> {
        let map: HashMap<String, Author> =
            serde_json::from_reader(src).map_err(AuthorsMapError::Json)?;
        Ok(Self { map })
    }

    /// Identity for an SVN author; `None` (a revision without
    /// `svn:author`) resolves like the username "no-author".
    pub(crate) fn lookup(&self, username: Option<&[u8]>) -> Author {
        let username = username
            .filter(|u| !u.is_empty())
            .map(|u| String::from_utf8_lossy(u).into_owned())
            .unwrap_or_else(|| "no-author".to_string());

        match self.map.get(&username) {
            Some(author) => author.clone(),
            None => Author {
                email: format!("{username}@localhost"),
                name: username,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Author, AuthorsMap};

    #[test]
    fn parses_and_looks_up() {
        let raw = br#"{"alice": {"Name": "Alice A.", "Email": "alice@example.org"}}"#;
        let map = AuthorsMap::parse(&mut raw.as_slice()).unwrap();

        assert_eq!(
            map.lookup(Some(b"alice")),
            Author {
                name: "Alice A.".into(),
                email: "alice@example.org".into(),
            },
        );
    }

    #[test]
    fn missing_users_default_to_localhost() {
        let map = AuthorsMap::new();
        assert_eq!(
            map.lookup(Some(b"bob")),
            Author {
                name: "bob".into(),
                email: "bob@localhost".into(),
            },
        );
        assert_eq!(
            map.lookup(None),
            Author {
                name: "no-author".into(),
                email: "no-author@localhost".into(),
            },
        );
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(AuthorsMap::parse(&mut b"[1,2]".as_slice()).is_err());
    }
}
