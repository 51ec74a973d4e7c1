//! Wire-visible statistics structs, serialised to YAML exactly as the `OK
//! <bytes>\r\n<yaml>\r\n` reply of `spec.md` §4.3 describes. Field set is
//! trimmed from the original protocol's tube-oriented stats (this crate has
//! no tube/`use`/`watch` concept, per `SPEC_FULL.md` §11) but otherwise
//! mirrors it field-for-field, including the cpu-time and hostname fields
//! that `spec.md` §4.3 names but which this process does not measure.

use serde::Serialize;

use crate::types::states::JobState;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ServerStats {
    #[serde(rename = "current-jobs-urgent")]
    pub current_jobs_urgent: u64,
    #[serde(rename = "current-jobs-ready")]
    pub current_jobs_ready: u64,
    #[serde(rename = "current-jobs-reserved")]
    pub current_jobs_reserved: u64,
    #[serde(rename = "current-jobs-delayed")]
    pub current_jobs_delayed: u64,
    #[serde(rename = "current-jobs-buried")]
    pub current_jobs_buried: u64,

    #[serde(rename = "cmd-put")]
    pub cmd_put: u64,
    #[serde(rename = "cmd-peek")]
    pub cmd_peek: u64,
    #[serde(rename = "cmd-reserve")]
    pub cmd_reserve: u64,
    #[serde(rename = "cmd-delete")]
    pub cmd_delete: u64,
    #[serde(rename = "cmd-release")]
    pub cmd_release: u64,
    #[serde(rename = "cmd-bury")]
    pub cmd_bury: u64,
    #[serde(rename = "cmd-kick")]
    pub cmd_kick: u64,
    #[serde(rename = "cmd-touch")]
    pub cmd_touch: u64,
    #[serde(rename = "cmd-stats")]
    pub cmd_stats: u64,

    #[serde(rename = "job-timeouts")]
    pub job_timeouts: u64,
    #[serde(rename = "total-jobs")]
    pub total_jobs: u64,
    #[serde(rename = "max-job-size")]
    pub max_job_size: u64,

    #[serde(rename = "current-connections")]
    pub current_connections: u64,
    #[serde(rename = "current-producers")]
    pub current_producers: u64,
    #[serde(rename = "current-workers")]
    pub current_workers: u64,
    #[serde(rename = "current-waiting")]
    pub current_waiting: u64,
    #[serde(rename = "total-connections")]
    pub total_connections: u64,

    pub pid: u32,
    pub version: &'static str,
    /// Not measured by this process; present only to keep the stats block's
    /// shape stable for tooling that expects the field to exist.
    #[serde(rename = "rusage-utime")]
    pub rusage_utime: u64,
    #[serde(rename = "rusage-stime")]
    pub rusage_stime: u64,
    pub uptime: u32,

    pub draining: bool,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct JobStats {
    pub id: u64,
    pub state: JobState,
    pub pri: u32,
    pub age: u64,
    pub delay: u64,
    pub ttr: u32,
    #[serde(rename = "time-left")]
    pub time_left: u64,
    pub reserves: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub buries: u64,
    pub kicks: u64,
}
