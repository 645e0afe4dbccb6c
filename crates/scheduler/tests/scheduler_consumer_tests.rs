use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use audiobot_application::{
    ConsumerState, JobHandler, JobRegistry, JobRunner, PublishOptions, StatusTracker,
    TaskContext, TaskPublisher,
};
use audiobot_config::{MessageQueueConfig, PublisherConfig};
use audiobot_domain::{
    Job, JobConfig, JobType, MessageBroker, OutboundMessage, Task, TaskStatus, Topology, Trigger,
};
use audiobot_errors::SchedulerResult;
use audiobot_infrastructure::InMemoryBroker;
use audiobot_scheduler::{JobScheduler, SchedulerConsumer};
use audiobot_testing_utils::{
    fast_retry_policy, test_tuning, MockLibraryStore, MockMemoryProbe, MockTaskStatusStore,
    TestEnv,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CONSUMER_ID: &str = "scheduler-test";

struct CountingJob {
    runs: Arc<AtomicUsize>,
    takes: Duration,
}

#[async_trait]
impl JobHandler for CountingJob {
    fn job_type(&self) -> JobType {
        JobType::CheckUsernames
    }

    async fn execute(&self, _ctx: &TaskContext, _config: &JobConfig) -> SchedulerResult<()> {
        tokio::time::sleep(self.takes).await;
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    broker: InMemoryBroker,
    topology: Arc<Topology>,
    store: MockTaskStatusStore,
    publisher: Arc<TaskPublisher>,
    consumer: Arc<SchedulerConsumer>,
    runs: Arc<AtomicUsize>,
    shutdown: broadcast::Sender<()>,
}

fn harness(store: MockTaskStatusStore, takes: Duration) -> Harness {
    let broker = InMemoryBroker::new();
    let topology = Arc::new(Topology::from_config(&MessageQueueConfig::default()));
    let publisher = Arc::new(TaskPublisher::new(
        Arc::new(broker.clone()),
        Arc::new(store.clone()),
        Arc::new(MockMemoryProbe(None)),
        topology.clone(),
        fast_retry_policy(0),
        PublisherConfig::default(),
    ));
    let ctx = Arc::new(TaskContext::new(
        Arc::new(store.clone()),
        Arc::new(MockLibraryStore::new()),
        publisher.clone(),
        test_tuning(),
    ));

    let runs = Arc::new(AtomicUsize::new(0));
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(CountingJob {
        runs: runs.clone(),
        takes,
    }));
    let runner = Arc::new(JobRunner::new(Arc::new(registry), ctx.clone()));
    let consumer = Arc::new(SchedulerConsumer::new(
        CONSUMER_ID,
        Arc::new(broker.clone()),
        topology.clone(),
        Arc::new(JobScheduler::new(runner.clone())),
        runner,
        StatusTracker::new(Arc::new(store.clone())),
        Duration::from_secs(60),
    ));
    let (shutdown, _) = broadcast::channel(1);

    Harness {
        broker,
        topology,
        store,
        publisher,
        consumer,
        runs,
        shutdown,
    }
}

impl Harness {
    async fn start(&self) -> JoinHandle<()> {
        let consumer = self.consumer.clone();
        let receiver = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            consumer.run(receiver).await.unwrap();
        });

        let broker = self.broker.clone();
        let command_queue = self.topology.command_queue(CONSUMER_ID).name;
        assert!(
            TestEnv::wait_for(
                || {
                    let broker = broker.clone();
                    let name = command_queue.clone();
                    async move { broker.has_queue(&name).await }
                },
                Duration::from_secs(5),
            )
            .await
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle
    }

    async fn wait_for_status(&self, key: &str, status: TaskStatus) -> bool {
        let store = self.store.clone();
        let key = key.to_string();
        TestEnv::wait_for(
            || {
                let store = store.clone();
                let key = key.clone();
                async move { store.record(&key).map(|r| r.status) == Some(status) }
            },
            Duration::from_secs(5),
        )
        .await
    }
}

#[tokio::test]
async fn test_job_registration_message_registers_job() {
    let h = harness(MockTaskStatusStore::new(), Duration::ZERO);
    let handle = h.start().await;

    let job = Job::new(JobType::CheckUsernames, Trigger::interval(3600, 3600));
    h.publisher.register_job(&job).await.unwrap();

    let jobs = h.consumer.jobs().clone();
    assert!(
        TestEnv::wait_for(
            || {
                let jobs = jobs.clone();
                async move { jobs.registered().await.len() == 1 }
            },
            Duration::from_secs(5),
        )
        .await
    );
    assert_eq!(jobs.registered().await[0], job);

    h.shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(jobs.registered().await.is_empty());
    assert_eq!(h.consumer.state().await, ConsumerState::Stopped);
}

#[tokio::test]
async fn test_direct_run_job_task_follows_job_outcome() {
    let h = harness(MockTaskStatusStore::new(), Duration::ZERO);
    let handle = h.start().await;

    let mut task = Task::run_job(JobType::CheckUsernames);
    let outcome = h
        .publisher
        .publish(&mut task, PublishOptions::default())
        .await
        .unwrap();
    assert!(h.wait_for_status(&outcome.record.key, TaskStatus::Done).await);
    assert_eq!(h.runs.load(Ordering::SeqCst), 1);

    let firings = h.store.records_of_type("job.check_usernames");
    assert_eq!(firings.len(), 1);
    assert_eq!(firings[0].status, TaskStatus::Done);

    h.shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_direct_run_of_inactive_job_fails() {
    let store = MockTaskStatusStore::new().with_job_config(JobConfig {
        is_active: false,
        ..JobConfig::new(JobType::CheckUsernames)
    });
    let h = harness(store, Duration::ZERO);
    let handle = h.start().await;

    let mut task = Task::run_job(JobType::CheckUsernames);
    let outcome = h
        .publisher
        .publish(&mut task, PublishOptions::default())
        .await
        .unwrap();
    assert!(
        h.wait_for_status(&outcome.record.key, TaskStatus::Failed)
            .await
    );
    assert_eq!(h.runs.load(Ordering::SeqCst), 0);

    h.shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_command_drains_in_flight_tasks() {
    let h = harness(MockTaskStatusStore::new(), Duration::from_millis(300));
    let handle = h.start().await;

    let mut task = Task::run_job(JobType::CheckUsernames);
    let outcome = h
        .publisher
        .publish(&mut task, PublishOptions::default())
        .await
        .unwrap();
    assert!(
        h.wait_for_status(&outcome.record.key, TaskStatus::InWorker)
            .await
    );

    let mut shutdown = Task::shutdown();
    let shutdown_outcome = h
        .publisher
        .publish(&mut shutdown, PublishOptions::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.store.record(&outcome.record.key).unwrap().status,
        TaskStatus::Done
    );
    assert_eq!(
        h.store.record(&shutdown_outcome.record.key).unwrap().status,
        TaskStatus::Done
    );
    assert_eq!(h.consumer.in_flight().await, 0);
}

#[tokio::test]
async fn test_malformed_and_misrouted_messages_do_not_stop_the_loop() {
    let h = harness(MockTaskStatusStore::new(), Duration::ZERO);
    let handle = h.start().await;

    let queue = h.topology.scheduler_queue();
    h.broker
        .publish(&OutboundMessage {
            exchange: queue.bindings[0].exchange.clone(),
            routing_key: queue.bindings[0].routing_key.clone(),
            payload: b"garbage".to_vec(),
            priority: 1,
        })
        .await
        .unwrap();

    let job = Job::new(JobType::IndexChannels, Trigger::interval(60, 0));
    h.publisher.register_job(&job).await.unwrap();

    let mut task = Task::run_job(JobType::CheckUsernames);
    let outcome = h
        .publisher
        .publish(&mut task, PublishOptions::default())
        .await
        .unwrap();
    assert!(h.wait_for_status(&outcome.record.key, TaskStatus::Done).await);
    assert!(h.consumer.jobs().registered().await.is_empty());

    h.shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_status_store_errors_do_not_stop_the_consumer() {
    let h = harness(MockTaskStatusStore::new(), Duration::ZERO);
    let handle = h.start().await;

    let mut task = Task::run_job(JobType::CheckUsernames);
    let outcome = h
        .publisher
        .publish(&mut task, PublishOptions::default())
        .await
        .unwrap();
    assert!(h.wait_for_status(&outcome.record.key, TaskStatus::Done).await);

    h.store.fail_status_updates();
    let mut shutdown = Task::shutdown();
    let shutdown_outcome = h
        .publisher
        .publish(&mut shutdown, PublishOptions::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.consumer.state().await, ConsumerState::Stopped);
    assert_eq!(
        h.store.record(&shutdown_outcome.record.key).unwrap().status,
        TaskStatus::Queued
    );
}
