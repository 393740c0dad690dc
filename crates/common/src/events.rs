//! Event-type tags and the per-tenant subscription set.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Kind of an inbound protocol event, as named in webhook payloads and in the
/// tenant's subscription column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Message,
    ReadReceipt,
    Presence,
    ChatPresence,
    HistorySync,
    Connected,
    Disconnected,
    LoggedOut,
    #[serde(rename = "QR")]
    Qr,
    PairSuccess,
    CallOffer,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::Message,
        EventKind::ReadReceipt,
        EventKind::Presence,
        EventKind::ChatPresence,
        EventKind::HistorySync,
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::LoggedOut,
        EventKind::Qr,
        EventKind::PairSuccess,
        EventKind::CallOffer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::ReadReceipt => "ReadReceipt",
            Self::Presence => "Presence",
            Self::ChatPresence => "ChatPresence",
            Self::HistorySync => "HistorySync",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::LoggedOut => "LoggedOut",
            Self::Qr => "QR",
            Self::PairSuccess => "PairSuccess",
            Self::CallOffer => "CallOffer",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Sentinel tag meaning "every event type".
pub const ALL_TAG: &str = "All";

/// Ordered set of subscribed event kinds, or every kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventSet {
    #[default]
    All,
    Only(Vec<EventKind>),
}

impl EventSet {
    /// Parse a list of tags, failing on the first unknown one. An empty list
    /// or any `All` tag yields [`EventSet::All`].
    pub fn from_tags<I, S>(tags: I) -> Result<Self, UnknownEventKind>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kinds = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if tag.is_empty() {
                continue;
            }
            if tag.eq_ignore_ascii_case(ALL_TAG) {
                return Ok(Self::All);
            }
            let kind = tag.parse::<EventKind>()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        if kinds.is_empty() {
            return Ok(Self::All);
        }
        Ok(Self::Only(kinds))
    }

    /// Parse the stored comma-separated column. Unknown tags are skipped and
    /// returned so the caller can report them.
    pub fn from_column(column: &str) -> (Self, Vec<String>) {
        let mut unknown = Vec::new();
        let known: Vec<&str> = column
            .split(',')
            .map(str::trim)
            .filter(|t| {
                let ok = t.is_empty()
                    || t.eq_ignore_ascii_case(ALL_TAG)
                    || t.parse::<EventKind>().is_ok();
                if !ok {
                    unknown.push((*t).to_string());
                }
                ok
            })
            .collect();
        // Every remaining tag is known, so this cannot fail.
        let set = Self::from_tags(known).unwrap_or_default();
        (set, unknown)
    }

    pub fn to_column(&self) -> String {
        match self {
            Self::All => ALL_TAG.to_string(),
            Self::Only(kinds) => kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.contains(&kind),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        match self {
            Self::All => vec![ALL_TAG.to_string()],
            Self::Only(kinds) => kinds.iter().map(|k| k.to_string()).collect(),
        }
    }
}
