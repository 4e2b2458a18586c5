//! # Envelope
//!
//! Module dedicated to the message descriptors returned by the
//! session when fetching new arrivals. An [`Envelope`] is composed of
//! a position, a unique identifier, some flags and few headers taken
//! from the message.

use std::{
    collections::BTreeSet,
    fmt,
    ops::{Deref, DerefMut},
};

use chrono::{DateTime, FixedOffset};

/// The unique identifier of a message inside a folder.
///
/// Unlike the position of a message, the identifier does not change
/// when other messages are expunged.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Uid {
    fn from(uid: u32) -> Self {
        Self(uid)
    }
}

/// The mailbox of a sender or a recipient.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Mailbox {
    pub name: Option<String>,
    pub addr: String,
}

impl Mailbox {
    pub fn new(name: Option<impl ToString>, addr: impl ToString) -> Self {
        Self {
            name: name.map(|name| name.to_string()),
            addr: addr.to_string(),
        }
    }

    pub fn new_nameless(addr: impl ToString) -> Self {
        Self {
            name: None,
            addr: addr.to_string(),
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.addr),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// The message flag.
///
/// A flag is like a tag that can be attached to a message. Flag
/// changes are reported by the session while watching, but they are
/// only observed.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub enum Flag {
    /// Flag used when the message has been opened.
    Seen,

    /// Flag used when the message has been answered.
    Answered,

    /// Flag used as a bookmark.
    Flagged,

    /// Flag used when the message is marked for deletion.
    Deleted,

    /// Flag used when the message is a draft.
    Draft,

    /// Flag used for all other use cases.
    Custom(String),
}

/// Parse a flag from a string. If the string does not match any of
/// the existing variant, it is considered as custom.
impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        let s = s.trim().trim_start_matches('\\');
        match s {
            seen if seen.eq_ignore_ascii_case("seen") => Flag::Seen,
            answered if answered.eq_ignore_ascii_case("answered") => Flag::Answered,
            flagged if flagged.eq_ignore_ascii_case("flagged") => Flag::Flagged,
            deleted if deleted.eq_ignore_ascii_case("deleted") => Flag::Deleted,
            draft if draft.eq_ignore_ascii_case("draft") => Flag::Draft,
            flag => Flag::Custom(flag.into()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Seen => write!(f, "seen"),
            Flag::Answered => write!(f, "answered"),
            Flag::Flagged => write!(f, "flagged"),
            Flag::Deleted => write!(f, "deleted"),
            Flag::Draft => write!(f, "draft"),
            Flag::Custom(flag) => write!(f, "{flag}"),
        }
    }
}

/// The set of message flags.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Flags(BTreeSet<Flag>);

impl Deref for Flags {
    type Target = BTreeSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<&str> for Flags {
    fn from(s: &str) -> Self {
        s.split_whitespace().map(Flag::from).collect()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, flag) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{flag}")?;
        }
        Ok(())
    }
}

/// The message descriptor.
///
/// This is what arrival handlers receive, in batches ordered by
/// position.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Envelope {
    /// The 0-based position of the message in the folder at fetch
    /// time.
    pub index: u32,

    /// The unique identifier of the message.
    pub uid: Uid,

    /// The Message-ID header.
    pub message_id: Option<String>,

    /// The Subject header.
    pub subject: Option<String>,

    /// The first mailbox of the From header.
    pub from: Option<Mailbox>,

    /// The first mailbox of the To header.
    pub to: Option<Mailbox>,

    /// The Date header.
    pub date: Option<DateTime<FixedOffset>>,

    /// The size of the message, in bytes.
    pub size: Option<u32>,

    pub flags: Flags,
}

impl Envelope {
    pub fn new(index: u32, uid: impl Into<Uid>) -> Self {
        Self {
            index,
            uid: uid.into(),
            ..Default::default()
        }
    }
}

/// Wrapper around a batch of envelopes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Envelopes(Vec<Envelope>);

impl Envelopes {
    /// Collect the unique identifiers of the batch, in order.
    pub fn uids(&self) -> Vec<Uid> {
        self.iter().map(|envelope| envelope.uid).collect()
    }

    pub fn into_vec(self) -> Vec<Envelope> {
        self.0
    }
}

impl Deref for Envelopes {
    type Target = Vec<Envelope>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Envelopes {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Envelope> for Envelopes {
    fn from_iter<T: IntoIterator<Item = Envelope>>(iter: T) -> Self {
        Envelopes(iter.into_iter().collect())
    }
}

impl From<Vec<Envelope>> for Envelopes {
    fn from(envelopes: Vec<Envelope>) -> Self {
        Self(envelopes)
    }
}

/// The items the session should fetch for each new message.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FetchFields {
    /// Fetch the envelope headers (subject, from, to, date).
    pub envelope: bool,

    /// Fetch the flags.
    pub flags: bool,

    /// Fetch the size.
    pub size: bool,
}

impl Default for FetchFields {
    fn default() -> Self {
        Self {
            envelope: true,
            flags: false,
            size: false,
        }
    }
}
