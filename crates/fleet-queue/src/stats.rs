//! Aggregate queue statistics per rollout and per wave.

use std::collections::BTreeMap;

use fleet_state::{JobStatus, QueueJob};
use serde::{Deserialize, Serialize};

/// Job counts by status plus derived rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub rolled_back: u64,
    /// Percentage (0-100) of non-cancelled jobs that reached completed or failed.
    pub completion_percentage: f64,
    /// `failed / (completed + failed)`, 0.0 with no terminal jobs.
    pub error_rate: f64,
}

impl QueueStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a QueueJob>) -> Self {
        let mut stats = QueueStats::default();
        for job in jobs {
            stats.total += 1;
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::RolledBack => stats.rolled_back += 1,
            }
        }
        let live = stats.total - stats.rolled_back;
        if live > 0 {
            stats.completion_percentage = stats.terminal() as f64 / live as f64 * 100.0;
        }
        if stats.terminal() > 0 {
            stats.error_rate = stats.failed as f64 / stats.terminal() as f64;
        }
        stats
    }

    /// Completed plus failed: the sample auto-halt evaluates.
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed
    }

    /// `completed / (completed + failed)`, 1.0 with no terminal jobs.
    pub fn success_rate(&self) -> f64 {
        if self.terminal() == 0 {
            1.0
        } else {
            self.completed as f64 / self.terminal() as f64
        }
    }

    /// Nothing left to claim or finish.
    pub fn is_drained(&self) -> bool {
        self.queued == 0 && self.processing == 0
    }
}

/// Progress of one wave of a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveProgress {
    pub wave_number: u32,
    pub stats: QueueStats,
    /// No jobs left in `queued` or `processing`.
    pub complete: bool,
}

/// Group jobs by wave number, ascending.
pub fn wave_progress(jobs: &[QueueJob]) -> Vec<WaveProgress> {
    let mut by_wave: BTreeMap<u32, Vec<&QueueJob>> = BTreeMap::new();
    for job in jobs {
        by_wave.entry(job.wave_number).or_default().push(job);
    }
    by_wave
        .into_iter()
        .map(|(wave_number, jobs)| {
            let stats = QueueStats::from_jobs(jobs);
            WaveProgress {
                wave_number,
                complete: stats.is_drained(),
                stats,
            }
        })
        .collect()
}
