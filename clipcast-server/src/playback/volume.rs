//! Two-tier volume cooperation
//!
//! Two persisted scalars: the **ceiling** (system-wide cap, set by an
//! operator) and the **level** (the value ordinary callers set). The
//! applied value is `level * ceiling / 100`; changing either scalar
//! recomputes and reapplies immediately using the last known other one.
//! Application goes through the sink's per-instance volume support:
//! every currently sounding instance is re-scaled in software. Sounds
//! register on start and unregister on their own completion; entries the
//! sink no longer knows are pruned lazily on the next volume change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use clipcast_common::events::{ClipcastEvent, EventBus};
use sqlx::{Pool, Sqlite};
use tracing::debug;
use uuid::Uuid;

use crate::db;
use crate::error::Result;
use crate::playback::sink::AudioSink;

#[derive(Debug, Clone, Copy)]
struct Scalars {
    level: u8,
    ceiling: u8,
}

/// Snapshot of the volume state after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeView {
    pub level: u8,
    pub ceiling: u8,
    pub effective: u8,
}

pub struct VolumeCoordinator {
    db: Pool<Sqlite>,
    sink: Arc<dyn AudioSink>,
    bus: EventBus,
    scalars: Mutex<Scalars>,
    /// sound id -> base gain (the clip's own volume option, 0.0-1.0)
    active: Mutex<HashMap<Uuid, f32>>,
}

fn effective_of(level: u8, ceiling: u8) -> u8 {
    (u16::from(level) * u16::from(ceiling) / 100) as u8
}

impl VolumeCoordinator {
    /// Load persisted scalars (defaulting to 100 when absent).
    pub async fn load(
        db: Pool<Sqlite>,
        sink: Arc<dyn AudioSink>,
        bus: EventBus,
    ) -> Result<Arc<Self>> {
        let level = db::settings::get_volume_level(&db).await?;
        let ceiling = db::settings::get_volume_ceiling(&db).await?;
        Ok(Arc::new(Self {
            db,
            sink,
            bus,
            scalars: Mutex::new(Scalars { level, ceiling }),
            active: Mutex::new(HashMap::new()),
        }))
    }

    fn scalars(&self) -> Scalars {
        *self.scalars.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn view(&self) -> VolumeView {
        let s = self.scalars();
        VolumeView {
            level: s.level,
            ceiling: s.ceiling,
            effective: effective_of(s.level, s.ceiling),
        }
    }

    pub fn level(&self) -> u8 {
        self.scalars().level
    }

    pub fn ceiling(&self) -> u8 {
        self.scalars().ceiling
    }

    /// `level * ceiling / 100`
    pub fn effective(&self) -> u8 {
        let s = self.scalars();
        effective_of(s.level, s.ceiling)
    }

    /// Final sink gain for a clip played with `step_volume` (1-100).
    pub fn sink_gain(&self, step_volume: u8) -> f32 {
        let base = f32::from(step_volume.min(100)) / 100.0;
        base * f32::from(self.effective()) / 100.0
    }

    pub async fn set_level(&self, level: u8) -> Result<VolumeView> {
        let level = level.min(100);
        {
            let mut s = self.scalars.lock().unwrap_or_else(|e| e.into_inner());
            s.level = level;
        }
        db::settings::set_volume_level(&self.db, level).await?;
        self.reapply();
        Ok(self.emit_changed())
    }

    /// Set the system-wide cap. Re-applies using the last known level;
    /// callers do not have to re-set the level themselves.
    pub async fn set_ceiling(&self, ceiling: u8) -> Result<VolumeView> {
        let ceiling = ceiling.min(100);
        {
            let mut s = self.scalars.lock().unwrap_or_else(|e| e.into_inner());
            s.ceiling = ceiling;
        }
        db::settings::set_volume_ceiling(&self.db, ceiling).await?;
        self.reapply();
        Ok(self.emit_changed())
    }

    /// Track a started sound so volume changes reach it live.
    pub fn register_sound(&self, sound_id: Uuid, base_gain: f32) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sound_id, base_gain);
    }

    /// Forget a sound on its completion notification.
    pub fn unregister_sound(&self, sound_id: Uuid) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sound_id);
    }

    /// Push the new effective volume to every registered sound, pruning
    /// entries the sink no longer knows. Best-effort cleanup: sounds that
    /// failed to unregister disappear here, not by a sweep.
    fn reapply(&self) {
        let eff = f32::from(self.effective()) / 100.0;
        let entries: Vec<(Uuid, f32)> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, base)| (*id, *base))
            .collect();

        let mut dead = Vec::new();
        for (id, base) in entries {
            if !self.sink.set_sound_volume(id, base * eff) {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            debug!("pruning {} finished sounds from volume roster", dead.len());
            let mut map = self.active.lock().unwrap_or_else(|e| e.into_inner());
            for id in dead {
                map.remove(&id);
            }
        }
    }

    fn emit_changed(&self) -> VolumeView {
        let view = self.view();
        self.bus.emit_lossy(ClipcastEvent::VolumeChanged {
            level: view.level,
            ceiling: view.ceiling,
            effective: view.effective,
            timestamp: chrono::Utc::now(),
        });
        view
    }
}
