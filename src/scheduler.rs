//! Fixed-cadence driver for fetching, alerting and retention.
//!
//! Every job runs in its own loop, so a slow run delays only the next firing
//! of the same job. Runs are wrapped by [`run_guarded`]: errors and panics are
//! logged and an overall deadline abandons a stuck run.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alert::AlertEvaluator;
use crate::clock::{Clock, MarketCalendar};
use crate::price::PriceFetcher;
use crate::retention::RetentionSweeper;

/// When a job fires, in market-local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Hourly { minute: u32 },
    DailyAt(NaiveTime),
}

impl Schedule {
    /// First firing strictly after `now`
    pub fn next_fire_after(&self, now: DateTime<Utc>, calendar: &MarketCalendar) -> DateTime<Utc> {
        let local = now.with_timezone(&calendar.offset()).naive_local();
        match *self {
            Schedule::Hourly { minute } => {
                let time = NaiveTime::from_hms_opt(local.hour(), minute.min(59), 0)
                    .unwrap_or(NaiveTime::MIN);
                let candidate = calendar.at(local.date(), time);
                if candidate > now {
                    candidate
                } else {
                    candidate + ChronoDuration::hours(1)
                }
            }
            Schedule::DailyAt(time) => {
                let candidate = calendar.at(local.date(), time);
                if candidate > now {
                    candidate
                } else {
                    calendar.at(local.date() + ChronoDuration::days(1), time)
                }
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Hourly { minute } => write!(f, "hourly at :{minute:02}"),
            Schedule::DailyAt(time) => write!(f, "daily at {}", time.format("%H:%M")),
        }
    }
}

/// The recurring jobs of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Fetch today's prices, then run the low and high price passes
    HourlyRefresh,
    TomorrowFetch,
    CheapestHours,
    DailySummary,
    RetentionSweep,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::HourlyRefresh => "hourly refresh",
            JobKind::TomorrowFetch => "tomorrow fetch",
            JobKind::CheapestHours => "cheapest hours",
            JobKind::DailySummary => "daily summary",
            JobKind::RetentionSweep => "retention sweep",
        };
        f.write_str(name)
    }
}

/// Cadences of every job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub hourly_minute: u32,
    pub tomorrow_fetch: NaiveTime,
    pub cheapest_hours: NaiveTime,
    pub daily_summary: NaiveTime,
    pub retention: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hourly_minute: 5,
            tomorrow_fetch: NaiveTime::from_hms_opt(13, 30, 0).unwrap_or(NaiveTime::MIN),
            cheapest_hours: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            daily_summary: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            retention: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl ScheduleConfig {
    pub fn jobs(&self) -> Vec<(JobKind, Schedule)> {
        vec![
            (JobKind::HourlyRefresh, Schedule::Hourly { minute: self.hourly_minute }),
            (JobKind::TomorrowFetch, Schedule::DailyAt(self.tomorrow_fetch)),
            (JobKind::CheapestHours, Schedule::DailyAt(self.cheapest_hours)),
            (JobKind::DailySummary, Schedule::DailyAt(self.daily_summary)),
            (JobKind::RetentionSweep, Schedule::DailyAt(self.retention)),
        ]
    }
}

/// How a guarded run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRun {
    Completed(String),
    Failed(String),
    Panicked,
    TimedOut,
}

/// Run `job` on its own task with a deadline. Never panics or propagates errors.
pub async fn run_guarded<F>(name: &str, deadline: Duration, job: F) -> JobRun
where
    F: Future<Output = Result<String, String>> + Send + 'static,
{
    log::info!("⏰ Starting {}", name);
    let mut handle = tokio::spawn(job);

    let run = match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(Ok(summary))) => JobRun::Completed(summary),
        Ok(Ok(Err(e))) => JobRun::Failed(e),
        Ok(Err(join_error)) if join_error.is_panic() => JobRun::Panicked,
        Ok(Err(join_error)) => JobRun::Failed(join_error.to_string()),
        Err(_) => {
            handle.abort();
            JobRun::TimedOut
        }
    };

    match &run {
        JobRun::Completed(summary) => log::info!("✅ {} finished: {}", name, summary),
        JobRun::Failed(e) => log::error!("❌ {} failed: {}", name, e),
        JobRun::Panicked => log::error!("💥 {} panicked", name),
        JobRun::TimedOut => log::error!("⌛ {} abandoned after {:?}", name, deadline),
    }
    run
}

/// The components a job acts on
pub struct Pipeline {
    pub fetcher: Arc<PriceFetcher>,
    pub evaluator: Arc<AlertEvaluator>,
    pub sweeper: Arc<RetentionSweeper>,
}

impl Pipeline {
    pub async fn run(&self, kind: JobKind) -> Result<String, String> {
        match kind {
            JobKind::HourlyRefresh => {
                let fetched = self.fetcher.fetch_today().await;
                let ok = fetched.iter().filter(|r| r.is_success()).count();
                let low = self.evaluator.low_price_pass().await.totals();
                let high = self.evaluator.high_price_pass().await.totals();
                Ok(format!(
                    "{}/{} zones fetched, {} low and {} high price alerts recorded",
                    ok,
                    fetched.len(),
                    low.recorded(),
                    high.recorded()
                ))
            }
            JobKind::TomorrowFetch => {
                let fetched = self.fetcher.fetch_tomorrow().await;
                let ok = fetched.iter().filter(|r| r.is_success()).count();
                Ok(format!("{}/{} zones fetched", ok, fetched.len()))
            }
            JobKind::CheapestHours => {
                let totals = self.evaluator.cheapest_hours_pass().await.totals();
                Ok(format!("{} cheapest-hours alerts recorded", totals.recorded()))
            }
            JobKind::DailySummary => {
                let totals = self.evaluator.daily_summary_pass().await.totals();
                Ok(format!("{} daily summaries recorded", totals.recorded()))
            }
            JobKind::RetentionSweep => {
                let report = self.sweeper.sweep().await.map_err(|e| e.to_string())?;
                Ok(format!(
                    "{} price points and {} alert records removed",
                    report.prices_removed, report.alerts_removed
                ))
            }
        }
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    clock: Arc<dyn Clock>,
    calendar: MarketCalendar,
    jobs: Vec<(JobKind, Schedule)>,
    deadline: Duration,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        clock: Arc<dyn Clock>,
        calendar: MarketCalendar,
        schedule: ScheduleConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            pipeline,
            clock,
            calendar,
            jobs: schedule.jobs(),
            deadline,
        }
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }

    /// Start one loop per job. Loops exit once `shutdown` turns `true` or its
    /// sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|&(kind, schedule)| {
                log::info!("📅 Scheduling {} {}", kind, schedule);
                tokio::spawn(job_loop(
                    kind,
                    schedule,
                    self.pipeline.clone(),
                    self.clock.clone(),
                    self.calendar,
                    self.deadline,
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}

enum Wake {
    Due,
    Signalled,
    Closed,
}

async fn job_loop(
    kind: JobKind,
    schedule: Schedule,
    pipeline: Arc<Pipeline>,
    clock: Arc<dyn Clock>,
    calendar: MarketCalendar,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = clock.now();
        let next = schedule.next_fire_after(now, &calendar);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        log::debug!("Next {} at {}", kind, next);

        let wake = tokio::select! {
            _ = tokio::time::sleep(wait) => Wake::Due,
            changed = shutdown.changed() => match changed {
                Ok(()) => Wake::Signalled,
                Err(_) => Wake::Closed,
            },
        };
        match wake {
            Wake::Due => {}
            Wake::Signalled => continue,
            Wake::Closed => break,
        }

        let pipeline = pipeline.clone();
        run_guarded(&kind.to_string(), deadline, async move { pipeline.run(kind).await }).await;
    }
    log::info!("🛑 {} loop stopped", kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar() -> MarketCalendar {
        MarketCalendar::from_offset_hours(1).unwrap()
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 21, h, m, 0).unwrap()
    }

    #[test]
    fn test_hourly_fires_at_next_minute_mark() {
        let schedule = Schedule::Hourly { minute: 5 };
        assert_eq!(schedule.next_fire_after(utc(10, 0), &calendar()), utc(10, 5));
        assert_eq!(schedule.next_fire_after(utc(10, 5), &calendar()), utc(11, 5));
        assert_eq!(schedule.next_fire_after(utc(10, 30), &calendar()), utc(11, 5));
    }

    #[test]
    fn test_daily_uses_market_local_time() {
        let schedule = Schedule::DailyAt(NaiveTime::from_hms_opt(13, 30, 0).unwrap());
        // 13:30 local is 12:30 UTC
        assert_eq!(schedule.next_fire_after(utc(9, 0), &calendar()), utc(12, 30));
        assert_eq!(
            schedule.next_fire_after(utc(12, 30), &calendar()),
            Utc.with_ymd_and_hms(2025, 12, 22, 12, 30, 0).unwrap()
        );
        // 23:30 UTC is already the 22nd locally
        assert_eq!(
            schedule.next_fire_after(utc(23, 30), &calendar()),
            Utc.with_ymd_and_hms(2025, 12, 22, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_default_cadences() {
        let jobs = ScheduleConfig::default().jobs();
        assert_eq!(jobs.len(), 5);
        assert_eq!(jobs[0], (JobKind::HourlyRefresh, Schedule::Hourly { minute: 5 }));
        assert_eq!(jobs[0].1.to_string(), "hourly at :05");
        assert_eq!(jobs[3].1.to_string(), "daily at 18:00");
    }

    #[tokio::test]
    async fn test_guarded_runner_reports_outcomes() {
        let deadline = Duration::from_secs(5);
        assert_eq!(
            run_guarded("ok", deadline, async { Ok("done".to_string()) }).await,
            JobRun::Completed("done".to_string())
        );
        assert_eq!(
            run_guarded("err", deadline, async { Err("boom".to_string()) }).await,
            JobRun::Failed("boom".to_string())
        );
        assert_eq!(
            run_guarded("panic", deadline, async move {
                if deadline > Duration::ZERO {
                    panic!("job exploded");
                }
                Ok(String::new())
            })
            .await,
            JobRun::Panicked
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_runner_abandons_after_deadline() {
        let run = run_guarded("stuck", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        })
        .await;
        assert_eq!(run, JobRun::TimedOut);
    }
}
