//! Conversion between [`VoteRecord`] and the string metadata map stored on
//! each image object.
//!
//! | key         | value                                      |
//! |-------------|--------------------------------------------|
//! | `upvotes`   | decimal count                              |
//! | `downvotes` | decimal count                              |
//! | `flagged`   | `"true"` or `"false"`                      |
//! | `userVotes` | JSON object of user id to `"up"`/`"down"`  |
//!
//! Metadata travels in HTTP headers, so every encoded value is plain ASCII:
//! non-ASCII characters in user ids are written as JSON `\uXXXX` escapes.
//!
//! Some backends lowercase metadata names on the way back (`uservotes`), so
//! decoding matches names case-insensitively. Decoding never fails: a field
//! that can't be read falls back to its empty value and is reported in
//! [`DecodeOutcome::corrupt`].

use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Write},
};

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};

use crate::{Vote, VoteRecord};

pub const UPVOTES: &str = "upvotes";
pub const DOWNVOTES: &str = "downvotes";
pub const FLAGGED: &str = "flagged";
pub const USER_VOTES: &str = "userVotes";

const FIELDS: [&str; 4] = [UPVOTES, DOWNVOTES, FLAGGED, USER_VOTES];

/// A metadata field that couldn't be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptField {
    pub field: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOutcome {
    pub record: VoteRecord,
    pub corrupt: Vec<CorruptField>,
}

pub fn encode(record: &VoteRecord) -> HashMap<String, String> {
    let user_votes: BTreeMap<&str, &str> = record
        .user_votes
        .iter()
        .map(|(user, vote)| (user.as_str(), vote.as_ref()))
        .collect();
    // A map of strings always serializes.
    let user_votes = to_ascii_json(&user_votes).unwrap_or_else(|_| "{}".to_string());

    HashMap::from([
        (UPVOTES.to_string(), record.upvotes.to_string()),
        (DOWNVOTES.to_string(), record.downvotes.to_string()),
        (FLAGGED.to_string(), record.flagged.to_string()),
        (USER_VOTES.to_string(), user_votes),
    ])
}

/// Compact JSON with every non-ASCII character escaped.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units).iter() {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

fn to_ascii_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut out = Vec::new();
    value.serialize(&mut Serializer::with_formatter(&mut out, AsciiFormatter))?;
    String::from_utf8(out)
        .map_err(|e| serde_json::Error::io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Write `record` over `existing`, keeping any metadata names the codec
/// doesn't own. Old spellings of owned names (e.g. `uservotes`) are dropped so
/// a decoder never sees two copies.
pub fn merge_into(existing: &HashMap<String, String>, record: &VoteRecord) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = existing
        .iter()
        .filter(|(name, _)| !is_owned(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    merged.extend(encode(record));
    merged
}

fn is_owned(name: &str) -> bool {
    FIELDS.iter().any(|field| field.eq_ignore_ascii_case(name))
}

fn lookup<'a>(metadata: &'a HashMap<String, String>, field: &str) -> Option<&'a str> {
    metadata.get(field).map(String::as_str).or_else(|| {
        metadata
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| value.as_str())
    })
}

pub fn decode(metadata: &HashMap<String, String>) -> DecodeOutcome {
    let mut corrupt = Vec::new();

    let mut count = |field: &'static str| -> u64 {
        match lookup(metadata, field) {
            None => 0,
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|e| {
                corrupt.push(CorruptField {
                    field,
                    reason: format!("{:?} is not a count: {}", raw, e),
                });
                0
            }),
        }
    };
    let upvotes = count(UPVOTES);
    let downvotes = count(DOWNVOTES);

    let flagged = match lookup(metadata, FLAGGED).map(str::trim) {
        None => false,
        Some(raw) if raw.eq_ignore_ascii_case("true") => true,
        Some(raw) if raw.eq_ignore_ascii_case("false") => false,
        Some(raw) => {
            corrupt.push(CorruptField {
                field: FLAGGED,
                reason: format!("{:?} is not a boolean", raw),
            });
            false
        }
    };

    let user_votes = match lookup(metadata, USER_VOTES) {
        None => BTreeMap::new(),
        Some(raw) => decode_user_votes(raw, &mut corrupt),
    };

    DecodeOutcome {
        record: VoteRecord {
            upvotes,
            downvotes,
            flagged,
            user_votes,
        },
        corrupt,
    }
}

fn decode_user_votes(raw: &str, corrupt: &mut Vec<CorruptField>) -> BTreeMap<String, Vote> {
    let entries: BTreeMap<String, serde_json::Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            corrupt.push(CorruptField {
                field: USER_VOTES,
                reason: format!("not a JSON object: {}", e),
            });
            return BTreeMap::new();
        }
    };

    let mut user_votes = BTreeMap::new();
    for (user, value) in entries {
        match value.as_str().and_then(|v| v.parse::<Vote>().ok()) {
            Some(vote) => {
                user_votes.insert(user, vote);
            }
            None => corrupt.push(CorruptField {
                field: USER_VOTES,
                reason: format!("dropped vote {} for user {:?}", value, user),
            }),
        }
    }
    user_votes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_decode_record() {
        let mut record = VoteRecord {
            upvotes: 3,
            downvotes: 1,
            flagged: true,
            ..Default::default()
        };
        record.user_votes.insert("alice".to_string(), Vote::Up);
        record.user_votes.insert("bob".to_string(), Vote::Down);

        let encoded = encode(&record);
        assert_eq!(encoded.get(UPVOTES).unwrap(), "3");
        assert_eq!(encoded.get(DOWNVOTES).unwrap(), "1");
        assert_eq!(encoded.get(FLAGGED).unwrap(), "true");
        assert_eq!(
            encoded.get(USER_VOTES).unwrap(),
            r#"{"alice":"up","bob":"down"}"#
        );

        let decoded = decode(&encoded);
        assert!(decoded.corrupt.is_empty());
        assert_eq!(decoded.record, record);
    }

    #[test]
    fn test_empty_metadata_is_a_fresh_record() {
        let decoded = decode(&HashMap::new());
        assert_eq!(decoded.record, VoteRecord::default());
        assert!(decoded.corrupt.is_empty());
    }

    #[test]
    fn test_lowercased_names_are_read() {
        let decoded = decode(&metadata(&[
            ("Upvotes", "2"),
            ("downvotes", "0"),
            ("FLAGGED", "TRUE"),
            ("uservotes", r#"{"alice":"up"}"#),
        ]));
        assert!(decoded.corrupt.is_empty());
        assert_eq!(decoded.record.upvotes, 2);
        assert!(decoded.record.flagged);
        assert_eq!(decoded.record.user_vote("alice"), Some(Vote::Up));
    }

    #[test]
    fn test_corrupt_user_votes_fall_back_to_empty() {
        let decoded = decode(&metadata(&[
            ("upvotes", "1"),
            ("downvotes", "0"),
            ("flagged", "false"),
            ("userVotes", "{not json"),
        ]));
        assert_eq!(decoded.record.upvotes, 1);
        assert!(decoded.record.user_votes.is_empty());
        assert_eq!(decoded.corrupt.len(), 1);
        assert_eq!(decoded.corrupt[0].field, USER_VOTES);
    }

    #[test]
    fn test_invalid_vote_values_are_dropped() {
        let decoded = decode(&metadata(&[(
            "userVotes",
            r#"{"alice":"up","bob":"sideways","carol":7}"#,
        )]));
        assert_eq!(decoded.record.user_votes.len(), 1);
        assert_eq!(decoded.record.user_vote("alice"), Some(Vote::Up));
        assert_eq!(decoded.corrupt.len(), 2);
    }

    #[test]
    fn test_malformed_counts_read_as_zero() {
        let decoded = decode(&metadata(&[("upvotes", "lots"), ("downvotes", "-1")]));
        assert_eq!(decoded.record.upvotes, 0);
        assert_eq!(decoded.record.downvotes, 0);
        let fields: Vec<_> = decoded.corrupt.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec![UPVOTES, DOWNVOTES]);
    }

    #[test]
    fn test_malformed_flag_is_reported() {
        let decoded = decode(&metadata(&[("flagged", "yes")]));
        assert!(!decoded.record.flagged);
        assert_eq!(decoded.corrupt.len(), 1);
        assert_eq!(decoded.corrupt[0].field, FLAGGED);
    }

    #[test]
    fn test_non_ascii_user_ids_encode_as_ascii() {
        let mut record = VoteRecord::default();
        record.apply_vote("josé", Vote::Up);
        record.apply_vote("Ωmega 😀", Vote::Down);

        let encoded = encode(&record);
        assert!(encoded.values().all(|value| value.is_ascii()));
        assert!(encoded.get(USER_VOTES).unwrap().contains(r"jos\u00e9"));
        assert!(encoded.get(USER_VOTES).unwrap().contains(r"\ud83d\ude00"));

        let decoded = decode(&encoded);
        assert!(decoded.corrupt.is_empty());
        assert_eq!(decoded.record, record);
        assert_eq!(decoded.record.user_vote("josé"), Some(Vote::Up));
    }

    #[test]
    fn test_merge_keeps_foreign_names() {
        let existing = metadata(&[
            ("uploader", "kiosk-3"),
            ("uservotes", r#"{"alice":"down"}"#),
            ("upvotes", "0"),
        ]);
        let mut record = VoteRecord::default();
        record.apply_vote("alice", Vote::Up);

        let merged = merge_into(&existing, &record);
        assert_eq!(merged.get("uploader").unwrap(), "kiosk-3");
        assert!(!merged.contains_key("uservotes"));
        assert_eq!(merged.get(USER_VOTES).unwrap(), r#"{"alice":"up"}"#);
        assert_eq!(merged.len(), 5);
    }
}
