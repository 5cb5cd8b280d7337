//! Player-access data model shared by the list store, the console layer and
//! the directory.
//!
//! Everything here is pure: record types for the three access lists, the
//! administrative command vocabulary and the codecs used by the on-disk
//! formats. No file or process I/O happens in this crate.

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::{Builder, Uuid};

pub const WHITELIST_FILE: &str = "whitelist.json";
pub const BANS_FILE: &str = "banned-players.json";
pub const OPS_FILE: &str = "ops.json";

pub const DEFAULT_BAN_SOURCE: &str = "Server";
pub const DEFAULT_BAN_REASON: &str = "Banned by an operator.";

/// Which of the three access lists a record or request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListKind {
    Whitelist,
    Bans,
    Ops,
}

impl ListKind {
    pub const ALL: [ListKind; 3] = [ListKind::Whitelist, ListKind::Bans, ListKind::Ops];

    /// File name the game server uses for this list inside its directory
    pub fn file_name(self) -> &'static str {
        match self {
            ListKind::Whitelist => WHITELIST_FILE,
            ListKind::Bans => BANS_FILE,
            ListKind::Ops => OPS_FILE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ListKind::Whitelist => "whitelist",
            ListKind::Bans => "bans",
            ListKind::Ops => "ops",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ListKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whitelist" => Ok(ListKind::Whitelist),
            "bans" | "banned-players" | "banlist" => Ok(ListKind::Bans),
            "ops" | "operators" => Ok(ListKind::Ops),
            other => Err(format!("unknown list kind: {}", other)),
        }
    }
}

/// A player identity as recorded in the list files.
///
/// The uuid is the durable identity; the name is whatever the player was
/// called when the record was last written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRef {
    pub uuid: Uuid,
    pub name: String,
}

impl PlayerRef {
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
        }
    }

    /// Identity an offline-mode server assigns to `name`
    pub fn offline(name: &str) -> Self {
        Self::new(offline_uuid(name), name)
    }

    /// Console name matching is case-insensitive
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// The id an offline-mode server assigns: MD5 of `OfflinePlayer:<name>`
/// with the version 3 bits set, and no namespace prefix.
pub fn offline_uuid(name: &str) -> Uuid {
    let digest = md5::compute(format!("OfflinePlayer:{}", name));
    Builder::from_md5_bytes(digest.0).into_uuid()
}

/// Common view over the three record types.
pub trait ListEntry: Clone {
    const KIND: ListKind;

    fn player(&self) -> &PlayerRef;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    #[serde(flatten)]
    pub player: PlayerRef,
}

impl WhitelistEntry {
    pub fn new(player: PlayerRef) -> Self {
        Self { player }
    }
}

impl ListEntry for WhitelistEntry {
    const KIND: ListKind = ListKind::Whitelist;

    fn player(&self) -> &PlayerRef {
        &self.player
    }
}

/// When a ban stops applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanExpiry {
    Never,
    At(DateTime<Utc>),
}

impl BanExpiry {
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        match self {
            BanExpiry::Never => false,
            BanExpiry::At(at) => *at <= now,
        }
    }
}

impl Serialize for BanExpiry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BanExpiry::Never => serializer.serialize_str(timestamp::FOREVER),
            BanExpiry::At(at) => serializer.serialize_str(&timestamp::format(at)),
        }
    }
}

impl<'de> Deserialize<'de> for BanExpiry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match timestamp::RawTime::deserialize(deserializer)? {
            timestamp::RawTime::Text(text) if timestamp::is_no_expiry(&text) => {
                Ok(BanExpiry::Never)
            }
            raw => raw.resolve().map(BanExpiry::At).map_err(serde::de::Error::custom),
        }
    }
}

/// A ban record.
///
/// Expired bans stay on record until the server prunes them, so readers see
/// them as-is; use [`BanEntry::is_active`] to tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    #[serde(flatten)]
    pub player: PlayerRef,
    #[serde(with = "timestamp::required", default = "timestamp::unix_epoch")]
    pub created: DateTime<Utc>,
    #[serde(default = "default_ban_source")]
    pub source: String,
    #[serde(default = "default_ban_expiry")]
    pub expires: BanExpiry,
    #[serde(default = "default_ban_reason")]
    pub reason: String,
}

impl BanEntry {
    pub fn new(player: PlayerRef, reason: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            player,
            // The file format stores whole seconds
            created: Utc::now().trunc_subsecs(0),
            source: source.into(),
            expires: BanExpiry::Never,
            reason: reason.into(),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.expires.has_passed(now)
    }
}

impl ListEntry for BanEntry {
    const KIND: ListKind = ListKind::Bans;

    fn player(&self) -> &PlayerRef {
        &self.player
    }
}

fn default_ban_source() -> String {
    DEFAULT_BAN_SOURCE.to_string()
}

fn default_ban_reason() -> String {
    DEFAULT_BAN_REASON.to_string()
}

fn default_ban_expiry() -> BanExpiry {
    BanExpiry::Never
}

/// Server permission tier, 1 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct OpLevel(u8);

impl OpLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for OpLevel {
    fn default() -> Self {
        OpLevel(Self::MAX)
    }
}

impl TryFrom<u8> for OpLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(OpLevel(value))
        } else {
            Err(format!(
                "op level {} outside {}..={}",
                value,
                Self::MIN,
                Self::MAX
            ))
        }
    }
}

impl From<OpLevel> for u8 {
    fn from(level: OpLevel) -> Self {
        level.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpEntry {
    #[serde(flatten)]
    pub player: PlayerRef,
    #[serde(default)]
    pub level: OpLevel,
    #[serde(
        rename = "bypassesPlayerLimit",
        alias = "bypasses_player_limit",
        default
    )]
    pub bypasses_player_limit: bool,
}

impl OpEntry {
    pub fn new(player: PlayerRef, level: OpLevel) -> Self {
        Self {
            player,
            level,
            bypasses_player_limit: false,
        }
    }
}

impl ListEntry for OpEntry {
    const KIND: ListKind = ListKind::Ops;

    fn player(&self) -> &PlayerRef {
        &self.player
    }
}

/// The administrative commands the console layer knows how to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    WhitelistAdd,
    WhitelistRemove,
    Ban,
    Pardon,
    Op,
    Deop,
    Kick,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::WhitelistAdd => "whitelist add",
            CommandKind::WhitelistRemove => "whitelist remove",
            CommandKind::Ban => "ban",
            CommandKind::Pardon => "pardon",
            CommandKind::Op => "op",
            CommandKind::Deop => "deop",
            CommandKind::Kick => "kick",
        }
    }

    /// The list a successful command of this kind changes, if any
    pub fn list_kind(self) -> Option<ListKind> {
        match self {
            CommandKind::WhitelistAdd | CommandKind::WhitelistRemove => Some(ListKind::Whitelist),
            CommandKind::Ban | CommandKind::Pardon => Some(ListKind::Bans),
            CommandKind::Op | CommandKind::Deop => Some(ListKind::Ops),
            CommandKind::Kick => None,
        }
    }

    /// Removal-style commands fail when the target is absent
    pub fn is_removal(self) -> bool {
        matches!(
            self,
            CommandKind::WhitelistRemove
                | CommandKind::Pardon
                | CommandKind::Deop
                | CommandKind::Kick
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One administrative request against a named player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    pub kind: CommandKind,
    pub name: String,
    pub reason: Option<String>,
}

impl AdminCommand {
    pub fn new(kind: CommandKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            reason: None,
        }
    }

    /// Attaches a reason; only `ban` and `kick` carry one on the wire
    pub fn with_reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        self
    }

    /// Rejects names and reasons that would smuggle extra console input.
    pub fn validate(&self) -> Result<(), String> {
        validate_player_name(&self.name)?;
        if let Some(reason) = &self.reason {
            if reason.chars().any(char::is_control) {
                return Err("reason contains control characters".to_string());
            }
        }
        Ok(())
    }

    /// The single console line this command is sent as
    pub fn to_command_line(&self) -> String {
        let reason = match self.kind {
            CommandKind::Ban | CommandKind::Kick => self.reason.as_deref(),
            _ => None,
        };
        match reason {
            Some(reason) => format!("{} {} {}", self.kind.as_str(), self.name, reason),
            None => format!("{} {}", self.kind.as_str(), self.name),
        }
    }

    /// Parses console shorthand such as `ban Steve griefing` or `whitelist add Alex`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let kind = match words.next()?.to_ascii_lowercase().as_str() {
            "whitelist" => match words.next()?.to_ascii_lowercase().as_str() {
                "add" => CommandKind::WhitelistAdd,
                "remove" => CommandKind::WhitelistRemove,
                _ => return None,
            },
            "ban" => CommandKind::Ban,
            "pardon" | "unban" => CommandKind::Pardon,
            "op" => CommandKind::Op,
            "deop" => CommandKind::Deop,
            "kick" => CommandKind::Kick,
            _ => return None,
        };
        let name = words.next()?;
        let rest: Vec<&str> = words.collect();
        let reason = rest.join(" ");
        Some(AdminCommand::new(kind, name).with_reason(Some(&reason)))
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_line())
    }
}

pub fn validate_player_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("player name is empty".to_string());
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("player name {:?} contains whitespace", name));
    }
    Ok(())
}

/// Timestamp codec for the list files.
///
/// The server writes `2024-01-31 18:04:11 +0000`; hand-edited files also
/// show up with RFC 3339 strings or epoch numbers, so all three are read.
pub mod timestamp {
    use super::*;

    pub const SERVER_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";
    pub const FOREVER: &str = "forever";

    // Anything at or above this is taken to be milliseconds
    const MILLIS_THRESHOLD: i64 = 100_000_000_000;

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    pub(crate) enum RawTime {
        Epoch(i64),
        Text(String),
    }

    impl RawTime {
        pub(crate) fn resolve(self) -> Result<DateTime<Utc>, String> {
            match self {
                RawTime::Epoch(value) => from_epoch(value),
                RawTime::Text(text) => parse(&text),
            }
        }
    }

    pub fn is_no_expiry(text: &str) -> bool {
        let text = text.trim();
        text.eq_ignore_ascii_case(FOREVER) || text.eq_ignore_ascii_case("never")
    }

    pub fn parse(text: &str) -> Result<DateTime<Utc>, String> {
        let text = text.trim();
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            let value = text
                .parse::<i64>()
                .map_err(|e| format!("bad epoch timestamp {:?}: {}", text, e))?;
            return from_epoch(value);
        }
        DateTime::parse_from_str(text, SERVER_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(text))
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| format!("unrecognised timestamp {:?}", text))
    }

    pub fn from_epoch(value: i64) -> Result<DateTime<Utc>, String> {
        let parsed = if value.abs() >= MILLIS_THRESHOLD {
            Utc.timestamp_millis_opt(value).single()
        } else {
            Utc.timestamp_opt(value, 0).single()
        };
        parsed.ok_or_else(|| format!("epoch timestamp {} out of range", value))
    }

    pub fn format(at: &DateTime<Utc>) -> String {
        at.format(SERVER_FORMAT).to_string()
    }

    pub fn unix_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }

    /// `#[serde(with)]` adapter for mandatory timestamps
    pub mod required {
        use super::*;

        pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&format(at))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
        where
            D: Deserializer<'de>,
        {
            RawTime::deserialize(deserializer)?
                .resolve()
                .map_err(serde::de::Error::custom)
        }
    }
}
