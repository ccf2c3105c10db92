pub mod codec;

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

pub const MAX_REGION_LEN: usize = 64;
pub const MAX_USER_ID_LEN: usize = 128;
const MAX_EXTENSION_LEN: usize = 8;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

impl Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// What a vote did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    /// First vote from this user.
    Cast,
    /// Same vote as the stored one; nothing changed.
    Unchanged,
    /// The user moved their vote to the other bucket.
    Switched { from: Vote },
}

impl VoteChange {
    pub fn is_noop(&self) -> bool {
        matches!(self, VoteChange::Unchanged)
    }
}

/// The vote and flag state stored in an image object's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteRecord {
    pub upvotes: u64,
    pub downvotes: u64,
    pub flagged: bool,
    pub user_votes: BTreeMap<String, Vote>,
}

impl VoteRecord {
    pub fn user_vote(&self, user_id: &str) -> Option<Vote> {
        self.user_votes.get(user_id).copied()
    }

    /// Apply a single-choice vote from `user_id`.
    ///
    /// Decrements of the previous bucket saturate at zero, so a record whose
    /// counters were already out of step with `user_votes` never underflows.
    pub fn apply_vote(&mut self, user_id: &str, vote: Vote) -> VoteChange {
        let change = match (self.user_vote(user_id), vote) {
            (Some(existing), vote) if existing == vote => return VoteChange::Unchanged,
            (None, Vote::Up) => {
                self.upvotes += 1;
                VoteChange::Cast
            }
            (None, Vote::Down) => {
                self.downvotes += 1;
                VoteChange::Cast
            }
            (Some(Vote::Up), Vote::Down) => {
                self.upvotes = self.upvotes.saturating_sub(1);
                self.downvotes += 1;
                VoteChange::Switched { from: Vote::Up }
            }
            (Some(Vote::Down), Vote::Up) => {
                self.downvotes = self.downvotes.saturating_sub(1);
                self.upvotes += 1;
                VoteChange::Switched { from: Vote::Down }
            }
            // equal votes returned above
            (Some(_), _) => return VoteChange::Unchanged,
        };
        self.user_votes.insert(user_id.to_string(), vote);
        change
    }

    /// Mark the record flagged. Returns false when it already was.
    pub fn apply_flag(&mut self) -> bool {
        if self.flagged {
            return false;
        }
        self.flagged = true;
        true
    }
}

/// A validated region name, the only query dimension of the store.
///
/// Letters, digits, spaces and underscores only: `-` ends the region inside a
/// key, so allowing it would let one region's prefix match another's keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region(String);

impl Region {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(anyhow!("region cannot be empty"));
        }
        if name.len() > MAX_REGION_LEN {
            return Err(anyhow!(
                "region cannot exceed {} characters",
                MAX_REGION_LEN
            ));
        }
        if name.trim() != name {
            return Err(anyhow!("region cannot start or end with whitespace"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == ' ' || *c == '_'))
        {
            return Err(anyhow!("region contains invalid character {:?}", c));
        }
        Ok(Self(name.to_string()))
    }

    pub fn get(&self) -> &str {
        &self.0
    }

    /// The key prefix shared by every image of this region.
    pub fn key_prefix(&self) -> String {
        format!("{}-", self.0)
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage key of an image: `{region}-{created_at_ms}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub region: Region,
    pub created_at_ms: u64,
    pub extension: String,
}

impl ImageKey {
    pub fn new(region: Region, created_at_ms: u64, extension: &str) -> Result<Self> {
        let extension = extension.to_ascii_lowercase();
        if !is_valid_extension(&extension) {
            return Err(anyhow!("invalid file extension {:?}", extension));
        }
        Ok(Self {
            region,
            created_at_ms,
            extension,
        })
    }
}

impl Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}.{}",
            self.region, self.created_at_ms, self.extension
        )
    }
}

impl FromStr for ImageKey {
    type Err = anyhow::Error;

    fn from_str(key: &str) -> Result<Self> {
        let (stem, extension) = key
            .rsplit_once('.')
            .ok_or_else(|| anyhow!("image key {:?} has no extension", key))?;
        let (region, created_at) = stem
            .rsplit_once('-')
            .ok_or_else(|| anyhow!("image key {:?} has no region prefix", key))?;
        let created_at_ms = created_at
            .parse::<u64>()
            .map_err(|e| anyhow!("image key {:?} has an invalid timestamp: {}", key, e))?;
        ImageKey::new(Region::new(region)?, created_at_ms, extension)
    }
}

fn is_valid_extension(extension: &str) -> bool {
    !extension.is_empty()
        && extension.len() <= MAX_EXTENSION_LEN
        && extension.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Pick the extension for an upload: the file name's own extension when it is
/// usable, else the MIME subtype (`image/svg+xml` gives `svg`), else `bin`.
pub fn extension_for(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| is_valid_extension(ext));
    if let Some(ext) = from_name {
        return ext;
    }
    content_type
        .split_once('/')
        .map(|(_, subtype)| {
            subtype
                .split(|c| c == '+' || c == ';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|ext| is_valid_extension(ext))
        .unwrap_or_else(|| "bin".to_string())
}

/// User ids are opaque client tokens; only their shape is checked.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(anyhow!("user id cannot be empty"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(anyhow!(
            "user id cannot exceed {} characters",
            MAX_USER_ID_LEN
        ));
    }
    if user_id.chars().any(|c| c.is_control()) {
        return Err(anyhow!("user id cannot contain control characters"));
    }
    Ok(())
}

/// One image as seen by a particular user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageView {
    pub key: String,
    pub url: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub upvotes: u64,
    pub downvotes: u64,
    pub flagged: bool,
    pub user_vote: Option<Vote>,
}

/// Tallies after a vote, plus the caller's resulting and previous vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub upvotes: u64,
    pub downvotes: u64,
    pub user_vote: Vote,
    pub previous_vote: Option<Vote>,
}
