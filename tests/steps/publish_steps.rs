#![expect(clippy::expect_used, reason = "simplify test failure output")]

//! Steps driving the publish loop against the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use cucumber::{World, given, then, when};
use serde_json::json;
use tempfile::TempDir;
use test_support::{FakeBroker, ScriptedTimer, WORK_QUEUE, temp_config, write_job_file};
use workmgrd::config::Config;
use workmgrd::publish_loop::{LoopStats, PublishLoop};

#[derive(World)]
pub struct PublishWorld {
    dir: TempDir,
    config: Config,
    broker: FakeBroker,
    stats: Option<LoopStats>,
    sleeps: Vec<Duration>,
}

impl Default for PublishWorld {
    fn default() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = temp_config(&dir);
        Self {
            dir,
            config,
            broker: FakeBroker::new(),
            stats: None,
            sleeps: Vec::new(),
        }
    }
}

impl std::fmt::Debug for PublishWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishWorld")
            .field("dir", &self.dir.path())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl PublishWorld {
    fn job_file(&self) -> &std::path::Path {
        self.config
            .job_filename
            .as_deref()
            .expect("job file configured")
    }

    fn stats(&self) -> LoopStats {
        self.stats.expect("the loop has run")
    }
}

#[given(regex = r"^a job file with jobs (\d+) and (\d+)$")]
fn job_file_with(world: &mut PublishWorld, first: u64, second: u64) {
    write_job_file(world.job_file(), &[json!({"id": first}), json!({"id": second})]);
}

#[given("a malformed job file")]
fn malformed_job_file(world: &mut PublishWorld) {
    std::fs::write(world.job_file(), "{ \"jobs\": [").expect("write job file");
}

#[given(regex = r"^the broker refuses the first (\d+) connections$")]
fn broker_refuses(world: &mut PublishWorld, count: usize) {
    world.broker = world.broker.clone().refuse_connections(count);
}

#[given("the broker cannot route messages")]
fn broker_unroutable(world: &mut PublishWorld) {
    world.broker = world.broker.clone().unroutable();
}

#[when(regex = r"^the work manager runs (\d+) cycles$")]
async fn run_cycles(world: &mut PublishWorld, cycles: usize) {
    let (timer, shutdown) = ScriptedTimer::stop_after(cycles);
    let stats = PublishLoop::new(
        Arc::new(world.config.clone()),
        world.broker.clone(),
        timer.clone(),
    )
    .run(shutdown)
    .await;
    world.stats = Some(stats);
    world.sleeps = timer.sleeps();
}

#[then(regex = r#"^the work queue holds "(.+)" and "(.+)"$"#)]
fn queue_holds(world: &mut PublishWorld, first: String, second: String) {
    assert_eq!(world.broker.bodies(WORK_QUEUE), [first, second]);
}

#[then("the work queue is empty")]
fn queue_empty(world: &mut PublishWorld) {
    assert!(world.broker.bodies(WORK_QUEUE).is_empty());
}

#[then("the job file has been consumed")]
fn file_consumed(world: &mut PublishWorld) {
    assert!(!world.job_file().exists());
}

#[then("every message is persistent")]
fn all_persistent(world: &mut PublishWorld) {
    let messages = world.broker.messages(WORK_QUEUE);
    assert!(!messages.is_empty());
    assert!(messages.iter().all(|m| m.persistent && m.mandatory));
}

#[then(regex = r"^(\d+) cycles were abandoned$")]
fn cycles_abandoned(world: &mut PublishWorld, count: u64) {
    assert_eq!(world.stats().failed_cycles, count);
}

#[then(regex = r"^(\d+) jobs were rejected$")]
fn jobs_rejected(world: &mut PublishWorld, count: u64) {
    assert_eq!(world.stats().rejected, count);
}

#[then(regex = r"^the loop waited (\d+) seconds between every cycle$")]
fn waited_between_cycles(world: &mut PublishWorld, secs: u64) {
    assert!(!world.sleeps.is_empty());
    assert!(world.sleeps.iter().all(|d| *d == Duration::from_secs(secs)));
}

#[then("no connection is left open")]
fn no_open_connection(world: &mut PublishWorld) {
    assert_eq!(world.broker.open_connections(), 0);
}
