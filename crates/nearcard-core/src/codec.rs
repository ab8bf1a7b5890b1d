//! Compact contact encoding.
//!
//! A contact is written as comma-separated `tag:value` fields using
//! single-letter tags, always in the same order:
//!
//! ```text
//! n name, s surname, p phone, t messenger, o organization,
//! j job title, w web page, v social url, a avatar
//! ```
//!
//! `n` is always present, the rest only when set. `{name: "Ann",
//! phone: "123"}` encodes to `n:Ann,p:123` — two bytes of overhead per
//! field, which matters when a packet carries nine characters.
//!
//! Inside values a backslash is written `\\` and a comma `\,`. Nothing
//! else is escaped: the tag ends at the first colon, so colons in values
//! are harmless. Values without `\` or `,` encode exactly as the plain
//! `tag:value` form, so unescaped peers still read them.

/// Field tags in wire order. Index 0 is the name.
pub const TAGS: [char; 9] = ['n', 's', 'p', 't', 'o', 'j', 'w', 'v', 'a'];

const FIELD_SEPARATOR: char = ',';
const TAG_SEPARATOR: char = ':';
const ESCAPE: char = '\\';

use crate::contact::ContactRecord;

/// Errors that can arise when decoding a compact payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

fn malformed(reason: impl Into<String>) -> CodecError {
    CodecError::MalformedPayload(reason.into())
}

/// Encode a contact into its compact text form.
pub fn encode(record: &ContactRecord) -> String {
    let mut out = String::with_capacity(16 + record.name.len());
    push_field(&mut out, TAGS[0], &record.name);

    for (tag, value) in TAGS[1..].iter().zip(record.optional_fields()) {
        if let Some(value) = value {
            out.push(FIELD_SEPARATOR);
            push_field(&mut out, *tag, value);
        }
    }
    out
}

fn push_field(out: &mut String, tag: char, value: &str) {
    out.push(tag);
    out.push(TAG_SEPARATOR);
    for c in value.chars() {
        if c == ESCAPE || c == FIELD_SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Decode a compact payload back into a contact.
///
/// A missing name decodes as the empty string; empty optional values decode
/// as `None`. Unknown or repeated tags are rejected.
pub fn decode(text: &str) -> Result<ContactRecord, CodecError> {
    if text.is_empty() {
        return Err(malformed("empty payload"));
    }

    let mut record = ContactRecord::default();
    let mut seen = [false; TAGS.len()];

    for field in split_fields(text)? {
        let (tag, value) = field
            .split_once(TAG_SEPARATOR)
            .ok_or_else(|| malformed(format!("field without tag: {field:?}")))?;

        let mut tag_chars = tag.chars();
        let position = match (tag_chars.next(), tag_chars.next()) {
            (Some(c), None) => TAGS.iter().position(|t| *t == c),
            _ => None,
        }
        .ok_or_else(|| malformed(format!("unknown tag: {tag:?}")))?;

        if std::mem::replace(&mut seen[position], true) {
            return Err(malformed(format!("repeated tag: {tag:?}")));
        }

        if position == 0 {
            record.name = value.to_string();
        } else if !value.is_empty() {
            *record.optional_fields_mut()[position - 1] = Some(value.to_string());
        }
    }

    Ok(record)
}

/// Split on unescaped separators, resolving escapes in the process.
fn split_fields(text: &str) -> Result<Vec<String>, CodecError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(next @ (ESCAPE | FIELD_SEPARATOR)) => current.push(next),
                Some(other) => return Err(malformed(format!("invalid escape: \\{other}"))),
                None => return Err(malformed("dangling escape at end of payload")),
            },
            FIELD_SEPARATOR => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    Ok(fields)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> ContactRecord {
        ContactRecord {
            name: "Ann".into(),
            surname: Some("Lee".into()),
            phone: Some("+1 555 0100".into()),
            messenger: Some("@ann".into()),
            organization: Some("Acme".into()),
            job_title: Some("Engineer".into()),
            web_page: Some("https://ann.example".into()),
            social_url: Some("https://social.example/ann".into()),
            avatar_url: Some("https://cdn.example/ann.png".into()),
        }
    }

    #[test]
    fn encodes_in_tag_order() {
        let record = ContactRecord {
            phone: Some("123".into()),
            ..ContactRecord::new("Ann")
        };
        assert_eq!(encode(&record), "n:Ann,p:123");

        assert_eq!(
            encode(&full_record()),
            "n:Ann,s:Lee,p:+1 555 0100,t:@ann,o:Acme,j:Engineer,\
             w:https://ann.example,v:https://social.example/ann,\
             a:https://cdn.example/ann.png"
        );
    }

    #[test]
    fn full_record_round_trips() {
        let record = full_record();
        assert_eq!(decode(&encode(&record)).unwrap(), record);
    }

    #[test]
    fn name_only_round_trips() {
        let record = ContactRecord::new("Ann");
        assert_eq!(encode(&record), "n:Ann");
        assert_eq!(decode("n:Ann").unwrap(), record);
    }

    #[test]
    fn separators_and_tags_inside_values_survive() {
        let record = ContactRecord {
            name: "Lee, Ann".into(),
            organization: Some(r"C:\work,n:x".into()),
            web_page: Some("http://a.example:8080/p:1".into()),
            ..ContactRecord::default()
        };
        let encoded = encode(&record);
        assert_eq!(
            encoded,
            r"n:Lee\, Ann,o:C:\\work\,n:x,w:http://a.example:8080/p:1"
        );
        assert_eq!(decode(&encoded).unwrap(), record);
    }

    #[test]
    fn missing_name_decodes_empty() {
        let record = decode("p:123").unwrap();
        assert_eq!(record.name, "");
        assert_eq!(record.phone.as_deref(), Some("123"));
    }

    #[test]
    fn empty_optional_value_decodes_absent() {
        let record = decode("n:Ann,s:").unwrap();
        assert_eq!(record.surname, None);
    }

    #[test]
    fn non_ascii_values_round_trip() {
        let record = ContactRecord {
            surname: Some("Трушкина".into()),
            ..ContactRecord::new("Евгения")
        };
        assert_eq!(decode(&encode(&record)).unwrap(), record);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for bad in ["", "Ann", "n:Ann,x:1", "n:Ann,n:Bob", "nn:Ann", "n:Ann\\", r"n:A\nn"] {
            assert!(
                matches!(decode(bad), Err(CodecError::MalformedPayload(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn truncated_payload_decodes_best_effort() {
        // A reassembly missing its tail still yields what arrived.
        let record = decode("n:Ann,p:12").unwrap();
        assert_eq!(record.name, "Ann");
        assert_eq!(record.phone.as_deref(), Some("12"));

        // Cut mid-tag is not a contact.
        assert!(decode("n:Ann,p").is_err());
    }
}
