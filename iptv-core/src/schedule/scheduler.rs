use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ChannelLookup, ProviderBinding, ProviderCatalog, RoleSet};
use crate::error::ConfigError;
use crate::guide::{role_start, AiringRequest, FusionSlots};
use crate::ledger::BusyLedger;
use crate::roles::Role;

use super::{JobCommands, JobScheduler, ScheduleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "role")]
pub enum JobKind {
    Record(Role),
    Fusion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub title: String,
    pub job: JobKind,
    pub rank: Option<u8>,
    pub provider: Option<String>,
    pub at: NaiveDateTime,
    pub command: String,
    pub queued: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleReport {
    pub airings: usize,
    pub duplicates: usize,
    pub unrecorded: Vec<String>,
    pub jobs: Vec<ScheduledJob>,
}

impl ScheduleReport {
    pub fn recordings(&self) -> impl Iterator<Item = &ScheduledJob> {
        self.jobs
            .iter()
            .filter(|job| matches!(job.job, JobKind::Record(_)))
    }

    pub fn fusions(&self) -> impl Iterator<Item = &ScheduledJob> {
        self.jobs.iter().filter(|job| job.job == JobKind::Fusion)
    }
}

/// Providers chosen for each role of one airing.
#[derive(Debug, Default)]
struct Fulfilled {
    primary: Option<String>,
    backup: Option<String>,
    backup2: Option<String>,
}

impl Fulfilled {
    fn get(&self, role: Role) -> Option<&String> {
        match role {
            Role::Primary => self.primary.as_ref(),
            Role::Backup => self.backup.as_ref(),
            Role::Backup2 => self.backup2.as_ref(),
        }
    }

    fn set(&mut self, role: Role, provider: &str) {
        let slot = match role {
            Role::Primary => &mut self.primary,
            Role::Backup => &mut self.backup,
            Role::Backup2 => &mut self.backup2,
        };
        *slot = Some(provider.to_string());
    }
}

/// Allocates primary, backup and backup2 recordings for guide airings over
/// the configured ranks and queues one fusion job per recorded airing.
pub struct ProviderScheduler {
    role_sets: Vec<RoleSet>,
    catalog: ProviderCatalog,
    ledger: Arc<dyn BusyLedger>,
    jobs: Arc<dyn JobScheduler>,
    commands: JobCommands,
    fusion_delay_minutes: i64,
}

impl ProviderScheduler {
    pub fn new(
        role_sets: Vec<RoleSet>,
        catalog: ProviderCatalog,
        ledger: Arc<dyn BusyLedger>,
        jobs: Arc<dyn JobScheduler>,
        commands: JobCommands,
    ) -> Self {
        Self {
            role_sets,
            catalog,
            ledger,
            jobs,
            commands,
            fusion_delay_minutes: 5,
        }
    }

    pub fn with_fusion_delay(mut self, minutes: i64) -> Self {
        self.fusion_delay_minutes = minutes;
        self
    }

    pub async fn run(
        &self,
        airings: &[AiringRequest],
        now: NaiveDateTime,
    ) -> ScheduleResult<ScheduleReport> {
        let mut report = ScheduleReport::default();
        let mut slots = FusionSlots::new(
            airings.iter().map(|airing| airing.start).collect(),
            airings
                .iter()
                .map(|airing| airing.fusion_trigger(self.fusion_delay_minutes))
                .collect(),
        );
        let mut previous: Option<&AiringRequest> = None;

        for airing in airings {
            if previous.is_some_and(|last| last.is_same_airing(airing)) {
                report.duplicates += 1;
                continue;
            }
            previous = Some(airing);
            report.airings += 1;

            let fulfilled = self.schedule_airing(airing, now, &mut report).await?;
            match fulfilled.primary.as_deref() {
                Some(primary) => {
                    let at = slots.resolve(airing.fusion_trigger(self.fusion_delay_minutes));
                    let command = self.commands.fuse(
                        &airing.title,
                        Some(primary),
                        fulfilled.backup.as_deref(),
                        fulfilled.backup2.as_deref(),
                    );
                    let queued = self.submit(&airing.title, at, &command).await;
                    report.jobs.push(ScheduledJob {
                        title: airing.title.clone(),
                        job: JobKind::Fusion,
                        rank: None,
                        provider: None,
                        at,
                        command,
                        queued,
                    });
                }
                None => {
                    info!(title = %airing.title, "no primary recording, fusion not scheduled");
                    report.unrecorded.push(airing.title.clone());
                }
            }
        }
        Ok(report)
    }

    async fn schedule_airing(
        &self,
        airing: &AiringRequest,
        now: NaiveDateTime,
        report: &mut ScheduleReport,
    ) -> ScheduleResult<Fulfilled> {
        let mut fulfilled = Fulfilled::default();

        // Ranks after the one that recorded the primary are not scanned.
        for set in &self.role_sets {
            if fulfilled.primary.is_some() {
                break;
            }
            let Some(primary) = set.primary.as_ref() else {
                continue;
            };

            let busy_until = self
                .ledger
                .busy_until(set.rank, &primary.provider)?
                .unwrap_or(now);
            if busy_until >= airing.start {
                info!(
                    title = %airing.title,
                    rank = set.rank,
                    provider = %primary.provider,
                    busy_until = %busy_until,
                    "rank busy for this airing"
                );
                continue;
            }

            if self
                .try_role(airing, set, Role::Primary, primary, report)
                .await?
            {
                fulfilled.set(Role::Primary, &primary.provider);
                self.ledger
                    .mark_busy(set.rank, &primary.provider, airing.end())?;
            }

            for role in [Role::Backup, Role::Backup2] {
                let Some(binding) = set.binding(role) else {
                    continue;
                };
                if fulfilled.get(role).is_some() {
                    continue;
                }
                if self.try_role(airing, set, role, binding, report).await? {
                    fulfilled.set(role, &binding.provider);
                }
            }
        }
        Ok(fulfilled)
    }

    /// Queues one recording when the provider maps the airing's channel.
    async fn try_role(
        &self,
        airing: &AiringRequest,
        set: &RoleSet,
        role: Role,
        binding: &ProviderBinding,
        report: &mut ScheduleReport,
    ) -> ScheduleResult<bool> {
        let map = self.catalog.get(&binding.provider).ok_or_else(|| {
            ConfigError::Invalid(format!("no channel map loaded for {}", binding.provider))
        })?;
        let url = match map.lookup(&airing.channel) {
            ChannelLookup::Found(url) => url,
            ChannelLookup::Empty => {
                info!(
                    title = %airing.title,
                    channel = %airing.channel,
                    provider = %binding.provider,
                    role = %role,
                    "channel has no stream url for this provider"
                );
                return Ok(false);
            }
            ChannelLookup::Missing => {
                warn!(
                    title = %airing.title,
                    channel = %airing.channel,
                    provider = %binding.provider,
                    role = %role,
                    "channel missing from provider map"
                );
                return Ok(false);
            }
        };

        let at = role_start(role, airing.start);
        let command = self.commands.record(
            &airing.title,
            &binding.provider,
            binding.recorder,
            url,
            airing.duration_seconds,
            role,
        );
        let queued = self.submit(&airing.title, at, &command).await;
        report.jobs.push(ScheduledJob {
            title: airing.title.clone(),
            job: JobKind::Record(role),
            rank: Some(set.rank),
            provider: Some(binding.provider.clone()),
            at,
            command,
            queued,
        });
        Ok(true)
    }

    /// A failed submission is logged and does not release the slot.
    async fn submit(&self, title: &str, at: NaiveDateTime, command: &str) -> bool {
        match self.jobs.schedule_at(at, command).await {
            Ok(()) => true,
            Err(err) => {
                warn!(title = %title, error = %err, "failed to queue job");
                false
            }
        }
    }
}
