//! Recurrence planning for locally defined jobs
//!
//! Each planning cycle expands every definition into the runs that fall
//! inside the look-ahead window. Cron definitions are re-expanded every cycle;
//! `once` definitions produce a single run on the first cycle and are then
//! retired. Cron fields are read in the host's local time zone.

use super::job_definitions::JobDefinition;
use super::types::Job;
use crate::utils::parse_schedule;
use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a definition runs
#[derive(Debug, Clone)]
pub enum Recurrence {
    Once,
    Cron(Box<Schedule>),
}

impl Recurrence {
    /// Parse a schedule header value: `once` or a cron expression
    pub fn parse(expression: &str) -> Result<Self, String> {
        let expression = expression.trim();
        if expression.eq_ignore_ascii_case("once") {
            return Ok(Recurrence::Once);
        }
        parse_schedule(expression).map(|schedule| Recurrence::Cron(Box::new(schedule)))
    }
}

/// A job instance and how long to wait before enqueuing it
#[derive(Debug, Clone)]
pub struct PlannedRun {
    pub job: Job,
    pub at: DateTime<Utc>,
    pub delay: Duration,
}

/// Expands job definitions into concrete runs
#[derive(Debug)]
pub struct RecurrencePlanner {
    definitions: Vec<JobDefinition>,
    window: Duration,
    max_occurrences: usize,
}

impl RecurrencePlanner {
    pub fn new(definitions: Vec<JobDefinition>, window: Duration, max_occurrences: usize) -> Self {
        info!(
            "Recurrence planner created with {} definitions (window {:?}, max {} occurrences per definition)",
            definitions.len(),
            window,
            max_occurrences
        );
        Self {
            definitions,
            window,
            max_occurrences,
        }
    }

    /// Definitions still taking part in planning
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Compute the runs falling within the window starting at `now`
    pub fn plan(&mut self, now: DateTime<Utc>) -> Vec<PlannedRun> {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        let mut runs = Vec::new();

        for definition in &self.definitions {
            match &definition.recurrence {
                Recurrence::Once => {
                    debug!("Planning one-off run of {}", definition.job.script);
                    runs.push(PlannedRun {
                        job: definition.job.fresh_instance(),
                        at: now,
                        delay: Duration::ZERO,
                    });
                }
                Recurrence::Cron(schedule) => {
                    let mut planned = 0usize;
                    let local_now = now.with_timezone(&Local);
                    for at in schedule.after(&local_now).take(self.max_occurrences) {
                        let at = at.with_timezone(&Utc);
                        let until = at - now;
                        if until > window {
                            break;
                        }
                        runs.push(PlannedRun {
                            job: definition.job.fresh_instance(),
                            at,
                            delay: until.to_std().unwrap_or(Duration::ZERO),
                        });
                        planned += 1;
                    }
                    if planned == self.max_occurrences {
                        warn!(
                            "Definition {} hit the limit of {} occurrences in one planning window",
                            definition.job.script, self.max_occurrences
                        );
                    }
                }
            }
        }

        self.definitions
            .retain(|definition| !matches!(definition.recurrence, Recurrence::Once));

        debug!("Planned {} runs", runs.len());
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduling::types::ScriptRef;
    use chrono::{TimeZone, Timelike};

    fn definition(schedule: &str) -> JobDefinition {
        JobDefinition {
            job: Job::new(ScriptRef::Inline("done()".to_string())),
            recurrence: Recurrence::parse(schedule).unwrap(),
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_once_definition_runs_on_first_cycle_only() {
        let mut planner =
            RecurrencePlanner::new(vec![definition("once")], Duration::from_secs(900), 100);

        let first = planner.plan(noon());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].delay, Duration::ZERO);
        assert!(planner.is_empty());

        assert!(planner.plan(noon()).is_empty());
    }

    #[test]
    fn test_cron_definition_expands_within_window() {
        let mut planner =
            RecurrencePlanner::new(vec![definition("*/5 * * * *")], Duration::from_secs(900), 100);

        let runs = planner.plan(noon());
        let delays: Vec<u64> = runs.iter().map(|run| run.delay.as_secs()).collect();
        assert_eq!(delays, vec![300, 600, 900]);

        // Every occurrence is its own logical job
        assert_ne!(runs[0].job.id, runs[1].job.id);
        assert_eq!(planner.len(), 1);
    }

    #[test]
    fn test_cron_hours_are_local_wall_clock() {
        let mut planner =
            RecurrencePlanner::new(vec![definition("0 9 * * *")], Duration::from_secs(86_400), 100);

        let runs = planner.plan(noon());
        assert_eq!(runs.len(), 1);
        let local = runs[0].at.with_timezone(&Local);
        assert_eq!((local.hour(), local.minute()), (9, 0));
        assert_eq!(runs[0].delay, (runs[0].at - noon()).to_std().unwrap());
    }

    #[test]
    fn test_cron_definition_is_capped_per_cycle() {
        let mut planner =
            RecurrencePlanner::new(vec![definition("* * * * * *")], Duration::from_secs(900), 100);

        let runs = planner.plan(noon());
        assert_eq!(runs.len(), 100);
        assert_eq!(runs.last().unwrap().delay, Duration::from_secs(100));
    }

    #[test]
    fn test_recurrence_parse_rejects_garbage() {
        assert!(matches!(Recurrence::parse(" ONCE "), Ok(Recurrence::Once)));
        assert!(Recurrence::parse("every tuesday").is_err());
    }
}
