use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three independent recording attempts made for an airing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Backup,
    Backup2,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Primary, Role::Backup, Role::Backup2];

    /// Tag used in segment and ledger filenames.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::Primary => "original",
            Role::Backup => "backup",
            Role::Backup2 => "backup_2",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" | "primary" => Ok(Role::Primary),
            "backup" => Ok(Role::Backup),
            "backup_2" | "backup2" => Ok(Role::Backup2),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderKind {
    Ffmpeg,
    Vlc,
    Mplayer,
    Streamlink,
}

impl RecorderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderKind::Ffmpeg => "ffmpeg",
            RecorderKind::Vlc => "vlc",
            RecorderKind::Mplayer => "mplayer",
            RecorderKind::Streamlink => "streamlink",
        }
    }

    /// Recorders whose output file grows steadily enough for size stagnation
    /// to mean a stalled stream.
    pub fn reports_size(&self) -> bool {
        matches!(self, RecorderKind::Ffmpeg | RecorderKind::Vlc)
    }
}

impl fmt::Display for RecorderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecorderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ffmpeg" => Ok(RecorderKind::Ffmpeg),
            "vlc" | "cvlc" => Ok(RecorderKind::Vlc),
            "mplayer" => Ok(RecorderKind::Mplayer),
            "streamlink" => Ok(RecorderKind::Streamlink),
            other => Err(format!("unknown recorder: {other}")),
        }
    }
}
