use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{ConfigError, Result};
use crate::roles::{RecorderKind, Role};

/// Highest rank a `[[rank]]` entry may occupy.
pub const MAX_RANKS: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IptvConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub binaries: BinariesSection,
    #[serde(default)]
    pub recorder: RecorderSection,
    #[serde(default)]
    pub fusion: FusionSection,
    #[serde(default)]
    pub logs: LogsSection,
    #[serde(default, rename = "rank")]
    pub ranks: Vec<RankSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub videos_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub providers_dir: PathBuf,
}

impl PathsSection {
    fn resolve_relative(&mut self, base: &Path) {
        for dir in [
            &mut self.videos_dir,
            &mut self.logs_dir,
            &mut self.data_dir,
            &mut self.providers_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinariesSection {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub cvlc: PathBuf,
    pub mplayer: PathBuf,
    pub streamlink: PathBuf,
    pub at: PathBuf,
    pub iptvctl: Option<PathBuf>,
}

impl Default for BinariesSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            cvlc: "cvlc".into(),
            mplayer: "mplayer".into(),
            streamlink: "streamlink".into(),
            at: "at".into(),
            iptvctl: None,
        }
    }
}

impl BinariesSection {
    pub fn recorder(&self, kind: RecorderKind) -> &Path {
        match kind {
            RecorderKind::Ffmpeg => &self.ffmpeg,
            RecorderKind::Vlc => &self.cvlc,
            RecorderKind::Mplayer => &self.mplayer,
            RecorderKind::Streamlink => &self.streamlink,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderSection {
    pub settle_seconds: u64,
    pub poll_interval_seconds: u64,
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            settle_seconds: 30,
            poll_interval_seconds: 40,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionSection {
    pub min_time: i64,
    pub safe_time: i64,
    pub min_segment_seconds: i64,
    pub discontinuity_tolerance_seconds: i64,
    pub duplicate_size_limit: usize,
    pub delay_minutes: i64,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            min_time: 0,
            safe_time: 0,
            min_segment_seconds: 80,
            discontinuity_tolerance_seconds: 300,
            duplicate_size_limit: 5,
            delay_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsSection {
    pub max_dir_bytes: u64,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            max_dir_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RankSection {
    pub provider: Option<String>,
    pub recorder: Option<RecorderKind>,
    pub backup: Option<String>,
    pub backup_recorder: Option<RecorderKind>,
    pub backup_2: Option<String>,
    pub backup_2_recorder: Option<RecorderKind>,
}

/// A provider bound to one role of a rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderBinding {
    pub provider: String,
    pub recorder: RecorderKind,
}

/// The primary/backup/backup2 bindings configured at one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSet {
    pub rank: u8,
    pub primary: Option<ProviderBinding>,
    pub backup: Option<ProviderBinding>,
    pub backup2: Option<ProviderBinding>,
}

impl RoleSet {
    pub fn binding(&self, role: Role) -> Option<&ProviderBinding> {
        match role {
            Role::Primary => self.primary.as_ref(),
            Role::Backup => self.backup.as_ref(),
            Role::Backup2 => self.backup2.as_ref(),
        }
    }
}

fn bind(
    rank: usize,
    role: Role,
    provider: &Option<String>,
    recorder: Option<RecorderKind>,
) -> Result<Option<ProviderBinding>> {
    let Some(provider) = provider.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let recorder = recorder.ok_or_else(|| {
        ConfigError::Invalid(format!(
            "rank {rank}: provider {provider} for role {role} has no recorder"
        ))
    })?;
    Ok(Some(ProviderBinding {
        provider: provider.to_string(),
        recorder,
    }))
}

impl IptvConfig {
    pub fn validate(&self) -> Result<()> {
        self.role_sets().map(|_| ())
    }

    /// Role sets in rank order, starting at rank 1.
    pub fn role_sets(&self) -> Result<Vec<RoleSet>> {
        if self.ranks.is_empty() {
            return Err(ConfigError::Invalid("no [[rank]] configured".into()));
        }
        if self.ranks.len() > MAX_RANKS {
            return Err(ConfigError::Invalid(format!(
                "{} ranks configured, at most {MAX_RANKS} are supported",
                self.ranks.len()
            )));
        }
        self.ranks
            .iter()
            .enumerate()
            .map(|(index, section)| {
                let rank = index + 1;
                Ok(RoleSet {
                    rank: rank as u8,
                    primary: bind(rank, Role::Primary, &section.provider, section.recorder)?,
                    backup: bind(rank, Role::Backup, &section.backup, section.backup_recorder)?,
                    backup2: bind(
                        rank,
                        Role::Backup2,
                        &section.backup_2,
                        section.backup_2_recorder,
                    )?,
                })
            })
            .collect()
    }

    /// Number of role slots referencing `provider`, i.e. how many streams the
    /// provider may serve at once.
    pub fn max_streams(&self, provider: &str) -> usize {
        self.ranks
            .iter()
            .flat_map(|rank| [&rank.provider, &rank.backup, &rank.backup_2])
            .filter(|slot| slot.as_deref().map(str::trim) == Some(provider))
            .count()
    }

    pub fn provider_ids(&self) -> BTreeSet<String> {
        self.ranks
            .iter()
            .flat_map(|rank| [&rank.provider, &rank.backup, &rank.backup_2])
            .filter_map(|slot| slot.as_deref().map(str::trim))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn guide_path(&self) -> PathBuf {
        self.paths.data_dir.join("info_progs.json")
    }

    pub fn guide_snapshot_path(&self) -> PathBuf {
        self.paths.data_dir.join("info_progs_last.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.paths.data_dir.join("busy_ledger.sqlite")
    }

    pub fn channel_map_path(&self, provider: &str) -> PathBuf {
        self.paths.providers_dir.join(format!("{provider}.toml"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelMapFile {
    #[serde(default)]
    channels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLookup<'a> {
    Found(&'a str),
    Empty,
    Missing,
}

/// Lowercase channel name to stream URL for one provider.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    pub provider: String,
    channels: HashMap<String, String>,
}

impl ChannelMap {
    pub fn new(provider: impl Into<String>, channels: HashMap<String, String>) -> Self {
        let channels = channels
            .into_iter()
            .map(|(name, url)| (name.trim().to_lowercase(), url.trim().to_string()))
            .collect();
        Self {
            provider: provider.into(),
            channels,
        }
    }

    pub fn lookup(&self, channel: &str) -> ChannelLookup<'_> {
        match self.channels.get(&channel.trim().to_lowercase()) {
            Some(url) if !url.is_empty() => ChannelLookup::Found(url),
            Some(_) => ChannelLookup::Empty,
            None => ChannelLookup::Missing,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channels whose non-empty URL does not parse.
    pub fn invalid_urls(&self) -> Vec<&str> {
        let mut invalid: Vec<&str> = self
            .channels
            .iter()
            .filter(|(_, url)| !url.is_empty() && Url::parse(url).is_err())
            .map(|(name, _)| name.as_str())
            .collect();
        invalid.sort_unstable();
        invalid
    }
}

/// Channel maps of every provider referenced by the rank configuration.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    maps: HashMap<String, ChannelMap>,
}

impl ProviderCatalog {
    pub fn load(config: &IptvConfig) -> Result<Self> {
        let mut maps = HashMap::new();
        for provider in config.provider_ids() {
            let map = load_channel_map(config.channel_map_path(&provider), &provider)?;
            let invalid = map.invalid_urls();
            if !invalid.is_empty() {
                warn!(provider = %provider, channels = ?invalid, "channel map holds unparsable urls");
            }
            maps.insert(provider, map);
        }
        Ok(Self { maps })
    }

    pub fn insert(&mut self, map: ChannelMap) {
        self.maps.insert(map.provider.clone(), map);
    }

    pub fn get(&self, provider: &str) -> Option<&ChannelMap> {
        self.maps.get(provider)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub iptv: IptvConfig,
    pub catalog: ProviderCatalog,
}

impl ConfigBundle {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let iptv = load_iptv_config(path)?;
        let catalog = ProviderCatalog::load(&iptv)?;
        Ok(Self { iptv, catalog })
    }
}

/// Loads and validates `iptv.toml`. Relative directories are taken from the
/// config file's own directory.
pub fn load_iptv_config<P: AsRef<Path>>(path: P) -> Result<IptvConfig> {
    let path = path.as_ref();
    let mut config: IptvConfig = load_toml(path)?;
    if let Some(base) = path.parent() {
        config.paths.resolve_relative(base);
    }
    config.validate()?;
    Ok(config)
}

pub fn load_channel_map<P: AsRef<Path>>(path: P, provider: &str) -> Result<ChannelMap> {
    let file: ChannelMapFile = load_toml(path)?;
    Ok(ChannelMap::new(provider, file.channels))
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
