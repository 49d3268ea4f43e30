use sha1::Digest as _;

use crate::config::EditMsgRule;

/// Inputs to one commit message, before decoration.
pub(crate) struct MessageInput<'a> {
    pub(crate) svn_log: &'a [u8],
    pub(crate) rev: u64,
    /// Messages of earlier `<SkipCommit>`-folded revisions on the same
    /// branch, oldest first.
    pub(crate) skipped_logs: &'a [Vec<u8>],
    /// Generated change summary used when the log starts empty.
    pub(crate) change_summary: &'a str,
}

/// Runs the `<EditMsg>` chains and assembles the message body. Rule
/// order: the MapPath's own rules first, then the project's (which carry
/// the inherited defaults at their tail); a matching `Final` rule stops
/// the chain.
pub(crate) fn build_message(
    input: &MessageInput<'_>,
    chains: &[&[EditMsgRule]],
) -> Vec<u8> {
    let mut body = apply_edit_chains(input.svn_log, input.rev, chains);

    // a log that is empty or opens with an empty paragraph gets the
    // generated summary in front
    if body.is_empty() {
        body = input.change_summary.as_bytes().to_vec();
    } else if body.starts_with(b"\n\n") {
        let mut with_summary = input.change_summary.as_bytes().to_vec();
        with_summary.extend(&body);
        body = with_summary;
    }

    let mut message = Vec::new();
    for skipped in input.skipped_logs.iter() {
        let edited = apply_edit_chains(skipped, input.rev, chains);
        push_paragraph(&mut message, &edited);
    }
    push_paragraph(&mut message, &body);

    message
}

fn apply_edit_chains(log: &[u8], rev: u64, chains: &[&[EditMsgRule]]) -> Vec<u8> {
    let mut text = normalize_endings(log);
    'all: for chain in chains.iter() {
        for rule in chain.iter() {
            if !rule.applies_at(rev) {
                continue;
            }
            if !rule.pattern.is_match(&text) {
                continue;
            }
            text = rule
                .pattern
                .replace_all(&text, rule.replace.as_slice())
                .into_owned();
            if rule.is_final {
                break 'all;
            }
        }
    }
    text
}

fn normalize_endings(log: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(log.len());
    let mut rem = log;
    while let Some(pos) = rem.iter().position(|&c| c == b'\r') {
        out.extend(&rem[..pos]);
        if rem.get(pos + 1) != Some(&b'\n') {
            out.push(b'\n');
        }
        rem = &rem[(pos + 1)..];
    }
    out.extend(rem);
    out
}

fn push_paragraph(message: &mut Vec<u8>, text: &[u8]) {
    let text = trim_newlines(text);
    if text.is_empty() && message.is_empty() {
        return;
    }
    if !message.is_empty() {
        message.extend(b"\n\n");
    }
    message.extend(text);
}

fn trim_newlines(text: &[u8]) -> &[u8] {
    let start = text.iter().position(|&c| c != b'\n').unwrap_or(text.len());
    let end = text.iter().rposition(|&c| c != b'\n').map_or(0, |i| i + 1);
    &text[start.min(end)..end]
}

/// Appends trailer lines: `SVN-revision`, cherry-pick annotations, and
/// the Gerrit `Change-Id`.
pub(crate) struct Decorations<'a> {
    pub(crate) revision_id: Option<u64>,
    pub(crate) cherry_picks: &'a [CherryPickNote],
    pub(crate) change_id_seed: Option<ChangeIdSeed<'a>>,
}

pub(crate) struct CherryPickNote {
    pub(crate) commit: gix_hash::ObjectId,
    pub(crate) branch: Vec<u8>,
    pub(crate) rev: u64,
}

/// What the Change-Id hashes over; stable across reruns by construction.
pub(crate) struct ChangeIdSeed<'a> {
    pub(crate) parents: &'a [gix_hash::ObjectId],
    pub(crate) author_name: &'a str,
    pub(crate) author_email: &'a str,
    pub(crate) timestamp: i64,
}

pub(crate) fn decorate_message(mut message: Vec<u8>, deco: &Decorations<'_>) -> Vec<u8> {
    let mut trailers = Vec::<Vec<u8>>::new();

    if let Some(rev) = deco.revision_id {
        trailers.push(format!("SVN-revision: {rev}").into_bytes());
    }

    for note in deco.cherry_picks.iter() {
        trailers.push(
            format!(
                "Cherry-picked-from: {} ({}@{})",
                note.commit,
                String::from_utf8_lossy(&note.branch),
                note.rev,
            )
            .into_bytes(),
        );
    }

    if let Some(ref seed) = deco.change_id_seed {
        trailers.push(format!("Change-Id: I{}", change_id(seed, &message)).into_bytes());
    }

    if !trailers.is_empty() {
        if !message.is_empty() {
            message.extend(b"\n\n");
        }
        for (i, trailer) in trailers.iter().enumerate() {
            if i != 0 {
                message.push(b'\n');
            }
            message.extend(trailer);
        }
    }

    if !message.ends_with(b"\n") {
        message.push(b'\n');
    }
    message
}

fn change_id(seed: &ChangeIdSeed<'_>, message: &[u8]) -> String {
    let mut h = sha1::Sha1::new();
    for parent in seed.parents.iter() {
        h.update(parent.as_bytes());
    }
    h.update(seed.author_name.as_bytes());
    h.update(b"\0");
    h.update(seed.author_email.as_bytes());
    h.update(b"\0");
    h.update(seed.timestamp.to_be_bytes());
    h.update(message);

    let digest = h.finalize();
    let mut hex = String::with_capacity(40);
    for byte in digest.iter() {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::{
        build_message, decorate_message, ChangeIdSeed, Decorations, MessageInput,
    };
    use crate::config::{Config, LoadOptions};

    fn input<'a>(log: &'a [u8], skipped: &'a [Vec<u8>]) -> MessageInput<'a> {
        MessageInput {
            svn_log: log,
            rev: 43,
            skipped_logs: skipped,
            change_summary: "Update 2 files",
        }
    }

    #[test]
    fn skipped_messages_fold_in_front() {
        let skipped = vec![b"typo".to_vec()];
        let msg = build_message(&input(b"fix thing", &skipped), &[]);
        assert_eq!(msg, b"typo\n\nfix thing");
    }

    #[test]
    fn empty_log_gets_summary() {
        let msg = build_message(&input(b"", &[]), &[]);
        assert_eq!(msg, b"Update 2 files");
    }

    #[test]
    fn edit_msg_rules_rewrite_and_stop_on_final() {
        let config = Config::load(
            Some(
                r#"<Projects>
                     <Project Name="p">
                       <EditMsg Final="Yes">
                         <Match>bug (\d+)</Match>
                         <Replace>issue #$1</Replace>
                       </EditMsg>
                       <EditMsg>
                         <Match>issue</Match>
                         <Replace>ticket</Replace>
                       </EditMsg>
                     </Project>
                   </Projects>"#,
            ),
            &LoadOptions::default(),
        )
        .unwrap();
        let rules = &config.projects[0].edit_msgs;

        let msg = build_message(&input(b"fixes bug 7", &[]), &[rules]);
        // the Final rule fires, the second never runs
        assert_eq!(msg, b"fixes issue #7");
    }

    #[test]
    fn edit_msg_rev_scoping() {
        let config = Config::load(
            Some(
                r#"<Projects>
                     <Project Name="p">
                       <EditMsg Revs="100-200">
                         <Match>old</Match>
                         <Replace>new</Replace>
                       </EditMsg>
                     </Project>
                   </Projects>"#,
            ),
            &LoadOptions::default(),
        )
        .unwrap();
        let rules = &config.projects[0].edit_msgs;

        // rev 43 is outside 100-200
        let msg = build_message(&input(b"old text", &[]), &[rules]);
        assert_eq!(msg, b"old text");
    }

    #[test]
    fn carriage_returns_normalize() {
        let msg = build_message(&input(b"a\r\nb\rc", &[]), &[]);
        assert_eq!(msg, b"a\nb\nc");
    }

    #[test]
    fn decorations_append_trailers() {
        let seed_parents = [gix_hash::ObjectId::from_bytes_or_panic(&[7u8; 20])];
        let deco = Decorations {
            revision_id: Some(43),
            cherry_picks: &[],
            change_id_seed: Some(ChangeIdSeed {
                parents: &seed_parents,
                author_name: "alice",
                author_email: "alice@example.org",
                timestamp: 1_700_000_000,
            }),
        };

        let first = decorate_message(b"body".to_vec(), &deco);
        let text = String::from_utf8(first.clone()).unwrap();
        assert!(text.starts_with("body\n\nSVN-revision: 43\nChange-Id: I"));
        assert!(text.ends_with('\n'));

        // identical inputs, identical Change-Id
        let second = decorate_message(b"body".to_vec(), &deco);
        assert_eq!(first, second);
    }
}
