//! Minute staggering for backup recordings and fusion triggers.
//!
//! Every rule moves the minute within the same hour, so the shifted start
//! never lands on another hour and never equals the original minute.

use chrono::{NaiveDateTime, Timelike};

use crate::roles::Role;

fn shift_minute(at: NaiveDateTime, delta: i32) -> NaiveDateTime {
    let minute = (at.minute() as i32 + delta).clamp(0, 59) as u32;
    at.with_minute(minute).unwrap_or(at)
}

/// One minute later, or one minute earlier at minute 59.
pub fn backup_start(start: NaiveDateTime) -> NaiveDateTime {
    if start.minute() != 59 {
        shift_minute(start, 1)
    } else {
        shift_minute(start, -1)
    }
}

/// Two minutes later below minute 58, two minutes earlier otherwise.
pub fn backup2_start(start: NaiveDateTime) -> NaiveDateTime {
    if start.minute() < 58 {
        shift_minute(start, 2)
    } else {
        shift_minute(start, -2)
    }
}

/// Moves a fusion trigger off a minute already taken by something else.
pub fn nudge_fusion(at: NaiveDateTime) -> NaiveDateTime {
    match at.minute() {
        58 | 59 => shift_minute(at, -2),
        _ => shift_minute(at, 2),
    }
}

pub fn role_start(role: Role, start: NaiveDateTime) -> NaiveDateTime {
    match role {
        Role::Primary => start,
        Role::Backup => backup_start(start),
        Role::Backup2 => backup2_start(start),
    }
}

/// Fusion triggers of one scheduling run, used to keep a fusion job from
/// firing in the same minute as a recording start or another fusion.
#[derive(Debug, Clone, Default)]
pub struct FusionSlots {
    record_starts: Vec<NaiveDateTime>,
    fusion_triggers: Vec<NaiveDateTime>,
}

impl FusionSlots {
    pub fn new(record_starts: Vec<NaiveDateTime>, fusion_triggers: Vec<NaiveDateTime>) -> Self {
        Self {
            record_starts,
            fusion_triggers,
        }
    }

    /// Final trigger for a fusion originally planned at `planned`.
    ///
    /// A trigger sharing its minute with a recording start is nudged. When it
    /// still matches more than one planned trigger, the first airing to reach
    /// here releases its untouched slot and moves, so the later one keeps it.
    pub fn resolve(&mut self, planned: NaiveDateTime) -> NaiveDateTime {
        let mut trigger = planned;
        if self.record_starts.contains(&trigger) {
            trigger = nudge_fusion(trigger);
        }
        let taken = self
            .fusion_triggers
            .iter()
            .filter(|other| **other == trigger)
            .count();
        if taken > 1 {
            if trigger == planned {
                if let Some(index) = self.fusion_triggers.iter().position(|t| *t == trigger) {
                    self.fusion_triggers.remove(index);
                }
            }
            trigger = nudge_fusion(trigger);
        }
        trigger
    }
}
