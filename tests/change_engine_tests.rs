/// Change engine tests
///
/// Multi-writer behaviour of the public API: every writer gets its own
/// ChangeManager over one shared store, as separate processes would.
/// Run with: cargo test --test change_engine_tests

use async_trait::async_trait;
use revlock::{
    ActorId, Address, AtomicCommand, BackingStore, ChangeManager, ChangeStatus, Command,
    CommandOutcome, Effect, EngineConfig, EngineError, InMemoryStore, Intent, JsonCodec,
    ManualClock, Result, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

/// Wraps a store and fails selected writes, standing in for a writer that
/// dies at a chosen point of the pipeline.
struct FaultyStore {
    inner: Arc<InMemoryStore>,
    /// Fail every update of an existing change record (dies while CREATING).
    fail_change_updates: bool,
    /// Fail entity writes (dies while EXECUTING, events already durable).
    fail_entity_writes: bool,
}

#[async_trait]
impl BackingStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_entity_writes && key.starts_with("n/") {
            return Err(EngineError::Storage(format!("injected crash writing {}", key)));
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_entity_writes && key.starts_with("n/") {
            return Err(EngineError::Storage(format!("injected crash deleting {}", key)));
        }
        self.inner.delete(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool> {
        if self.fail_change_updates && key.starts_with("c/") && expected.is_some() {
            return Err(EngineError::Storage(format!("injected crash updating {}", key)));
        }
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.inner.scan_prefix(prefix).await
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_heartbeat_timeout(Duration::from_secs(1))
        .with_wait_initial(Duration::from_millis(1))
        .with_wait_max(Duration::from_millis(20))
}

fn writer(store: &Arc<InMemoryStore>) -> ChangeManager {
    ChangeManager::builder(store.clone(), "m")
        .config(fast_config())
        .build()
        .unwrap()
}

fn manual_writer(store: Arc<dyn BackingStore>, clock: &Arc<ManualClock>) -> ChangeManager {
    ChangeManager::builder(store, "m")
        .config(fast_config())
        .clock(clock.clone())
        .build()
        .unwrap()
}

async fn seed_model(writer: &ChangeManager) {
    let outcome = writer
        .execute_command(&AtomicCommand::add(Address::model("m")).into(), None)
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Committed(0));
}

async fn event_keys(store: &InMemoryStore) -> Vec<String> {
    store
        .scan_prefix("e/")
        .await
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect()
}

// ============================================================================
// Revision allocation
// ============================================================================

#[tokio::test]
async fn test_concurrent_writers_get_contiguous_unique_revisions() {
    let store = Arc::new(InMemoryStore::new());
    seed_model(&writer(&store)).await;

    let num_writers = 16;
    let mut handles = vec![];
    for task_id in 0..num_writers {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let writer = writer(&store);
            let add = AtomicCommand::add(Address::object("m", format!("o{}", task_id)));
            writer.execute_command(&add.into(), None).await.unwrap()
        }));
    }

    let mut revisions = BTreeSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        let revision = outcome.revision().expect("every add commits");
        assert!(revisions.insert(revision), "revision {} handed out twice", revision);
    }
    assert_eq!(revisions, (1..=num_writers).collect::<BTreeSet<i64>>());

    let reader = writer(&store);
    assert_eq!(reader.current_revision().await.unwrap(), num_writers);
    assert_eq!(reader.children(&Address::model("m")).await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_current_revision_is_monotone_and_never_ahead() {
    let store = Arc::new(InMemoryStore::new());
    seed_model(&writer(&store)).await;

    let reader_store = Arc::clone(&store);
    let reader = tokio::spawn(async move {
        let reader = writer(&reader_store);
        let mut last = -1;
        for _ in 0..200 {
            let current = reader.current_revision().await.unwrap();
            assert!(current >= last, "current revision went back from {} to {}", last, current);
            for revision in 0..=current {
                let status = reader.change_status(revision).await.unwrap().unwrap();
                assert!(status.is_terminal(), "revision {} is {} below current", revision, status);
            }
            last = current;
            tokio::task::yield_now().await;
        }
    });

    let mut handles = vec![];
    for task_id in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let writer = writer(&store);
            for i in 0..5 {
                // Half the writers share one object, so some of them wait
                let object = if task_id % 2 == 0 { "shared".to_string() } else { format!("own{}", task_id) };
                let add = AtomicCommand::add(Address::object("m", format!("{}-{}", object, i)));
                writer.execute_command(&add.into(), None).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    reader.await.unwrap();

    assert_eq!(writer(&store).current_revision().await.unwrap(), 40);
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test]
async fn test_conflicting_increments_are_serialized() {
    let store = Arc::new(InMemoryStore::new());
    let setup = Command::Transaction(vec![
        AtomicCommand::add(Address::model("m")),
        AtomicCommand::add(Address::object("m", "counter")),
        AtomicCommand::add_field(Address::field("m", "counter", "n"), 0i64),
    ]);
    writer(&store).execute_command(&setup, None).await.unwrap();

    let field = Address::field("m", "counter", "n");
    let num_tasks = 8;
    let mut handles = vec![];
    for task_id in 0..num_tasks {
        let store = Arc::clone(&store);
        let field = field.clone();
        handles.push(tokio::spawn(async move {
            let writer = writer(&store);
            let actor = ActorId::new(format!("task{}", task_id));
            loop {
                let entity = writer.get_entity(&field).await.unwrap().unwrap();
                let current = entity.value().and_then(Value::as_i64).unwrap();
                let bump = AtomicCommand::change(field.clone(), current + 1)
                    .with_intent(Intent::SafeAt(entity.revision));
                match writer.execute_command(&bump.into(), Some(&actor)).await.unwrap() {
                    CommandOutcome::Committed(revision) => return revision,
                    CommandOutcome::Failed => continue,
                    CommandOutcome::NoChange => panic!("increment cannot be a no-op"),
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let reader = writer(&store);
    let entity = reader.get_entity(&field).await.unwrap().unwrap();
    assert_eq!(entity.value(), Some(&Value::Integer(num_tasks)));

    // Committed events chain: each one starts from the value the previous left
    let events = reader.events_between(1, reader.current_revision().await.unwrap()).await.unwrap();
    assert_eq!(events.len(), num_tasks as usize);
    for (i, event) in events.iter().enumerate() {
        let Effect::Change { old_value, new_value, .. } = &event.effects[0] else {
            panic!("unexpected effect {:?}", event.effects[0]);
        };
        assert_eq!(old_value, &Some(Value::Integer(i as i64)));
        assert_eq!(new_value, &Some(Value::Integer(i as i64 + 1)));
    }
}

#[tokio::test]
async fn test_disjoint_writer_does_not_wait_for_open_change() {
    let store = Arc::new(InMemoryStore::new());
    seed_model(&writer(&store)).await;

    // Dies right after allocating revision 1 with a lock on /m/a
    let doomed = ChangeManager::builder(
        Arc::new(FaultyStore {
            inner: Arc::clone(&store),
            fail_change_updates: true,
            fail_entity_writes: false,
        }),
        "m",
    )
    .config(fast_config())
    .build()
    .unwrap();
    let stuck = doomed
        .execute_command(&AtomicCommand::add(Address::object("m", "a")).into(), None)
        .await;
    assert!(matches!(stuck, Err(EngineError::Storage(_))));

    // Long timeout: the open change must hold the counter, not get recovered
    let other = ChangeManager::builder(store.clone(), "m")
        .config(fast_config().with_heartbeat_timeout(Duration::from_secs(600)))
        .build()
        .unwrap();
    let add_b = AtomicCommand::add(Address::object("m", "b"));
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        other.execute_command(&add_b.into(), None),
    )
    .await
    .expect("disjoint change must not block")
    .unwrap();
    assert_eq!(outcome, CommandOutcome::Committed(2));

    // The open revision 1 holds the counter back
    assert_eq!(other.change_status(1).await.unwrap(), Some(ChangeStatus::Creating));
    assert_eq!(other.current_revision().await.unwrap(), 0);
    assert!(other.get_event_at(2).await.unwrap().is_some());
}

// ============================================================================
// Outcomes
// ============================================================================

#[tokio::test]
async fn test_noop_and_failed_commands_write_no_events() {
    let store = Arc::new(InMemoryStore::new());
    let writer = writer(&store);
    seed_model(&writer).await;
    let add = AtomicCommand::add(Address::object("m", "o"));
    assert_eq!(
        writer.execute_command(&add.clone().into(), None).await.unwrap(),
        CommandOutcome::Committed(1)
    );
    let events_before = event_keys(&store).await;

    let noop = writer
        .execute_command(&add.clone().with_intent(Intent::Forced).into(), None)
        .await
        .unwrap();
    assert_eq!(noop, CommandOutcome::NoChange);
    assert_eq!(noop.code(), -2);

    let failed = writer.execute_command(&add.into(), None).await.unwrap();
    assert_eq!(failed, CommandOutcome::Failed);
    assert_eq!(failed.code(), -1);

    assert_eq!(event_keys(&store).await, events_before);
    assert_eq!(writer.change_status(2).await.unwrap(), Some(ChangeStatus::SuccessNochange));
    assert_eq!(writer.change_status(3).await.unwrap(), Some(ChangeStatus::FailedPreconditions));
    assert!(writer.get_event_at(2).await.unwrap().is_none());
    assert!(writer.get_event_at(3).await.unwrap().is_none());
    // Both still count as committed
    assert_eq!(writer.current_revision().await.unwrap(), 3);
    assert_eq!(writer.events_between(0, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_command_for_another_model_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let writer = writer(&store);
    let result = writer
        .execute_command(&AtomicCommand::add(Address::model("other")).into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidCommand(_))));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_non_finite_float_is_rejected_before_allocation() {
    let store = Arc::new(InMemoryStore::new());
    let writer = ChangeManager::builder(store.clone(), "m")
        .codec(Arc::new(JsonCodec))
        .build()
        .unwrap();
    let setup = Command::Transaction(vec![
        AtomicCommand::add(Address::model("m")),
        AtomicCommand::add(Address::object("m", "o")),
        AtomicCommand::add_field(Address::field("m", "o", "f"), 1e-20),
    ]);
    assert_eq!(
        writer.execute_command(&setup, None).await.unwrap(),
        CommandOutcome::Committed(0)
    );

    for bad in [f64::NAN, f64::INFINITY] {
        let result = writer
            .execute_command(&AtomicCommand::change(Address::field("m", "o", "f"), bad).into(), None)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidCommand(_))));
    }
    assert_eq!(writer.change_status(1).await.unwrap(), None);

    // Close but distinct floats are a real change and survive the JSON events
    let outcome = writer
        .execute_command(&AtomicCommand::change(Address::field("m", "o", "f"), 3e-20).into(), None)
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Committed(1));
    let event = writer.get_event_at(1).await.unwrap().unwrap();
    assert!(matches!(
        &event.effects[..],
        [Effect::Change { new_value: Some(Value::Float(v)), .. }] if (*v - 3e-20).abs() < 1e-30
    ));
}

#[tokio::test]
async fn test_json_codec_keeps_events_readable() {
    let store = Arc::new(InMemoryStore::new());
    let writer = ChangeManager::builder(store.clone(), "m")
        .codec(Arc::new(JsonCodec))
        .build()
        .unwrap();
    seed_model(&writer).await;

    let (_, bytes) = store.scan_prefix("e/").await.unwrap().remove(0);
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["revision"], 0);
    let event = writer.get_event_at(0).await.unwrap().unwrap();
    assert_eq!(event.effects.len(), 1);
}

// ============================================================================
// Crash recovery through the public API
// ============================================================================

/// Revisions: 0 model, 1 A adds O1 with field F, 2 B adds O2, 3 C changes F.
async fn run_stalled_writer_scenario(a_dies_executing: bool) -> (ChangeManager, CommandOutcome) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    seed_model(&manual_writer(store.clone(), &clock)).await;

    let a = manual_writer(
        Arc::new(FaultyStore {
            inner: Arc::clone(&store),
            fail_change_updates: !a_dies_executing,
            fail_entity_writes: a_dies_executing,
        }),
        &clock,
    );
    let add_o1 = Command::Transaction(vec![
        AtomicCommand::add(Address::object("m", "O1")),
        AtomicCommand::add_field(Address::field("m", "O1", "F"), 1i64),
    ]);
    assert!(a.execute_command(&add_o1, Some(&ActorId::new("A"))).await.is_err());

    let b = manual_writer(store.clone(), &clock);
    let before = clock_now(&clock);
    let add_o2 = AtomicCommand::add(Address::object("m", "O2"));
    assert_eq!(
        b.execute_command(&add_o2.into(), Some(&ActorId::new("B"))).await.unwrap(),
        CommandOutcome::Committed(2)
    );
    assert_eq!(clock_now(&clock), before, "B must not wait on A");

    let c = manual_writer(store.clone(), &clock);
    let change_f = AtomicCommand::change(Address::field("m", "O1", "F"), 2i64);
    let outcome = c
        .execute_command(&change_f.into(), Some(&ActorId::new("C")))
        .await
        .unwrap();
    (c, outcome)
}

fn clock_now(clock: &Arc<ManualClock>) -> chrono::DateTime<chrono::Utc> {
    use revlock::Clock;
    clock.now()
}

#[tokio::test]
async fn test_stalled_executing_writer_is_rolled_forward() {
    let (c, outcome) = run_stalled_writer_scenario(true).await;

    assert_eq!(outcome, CommandOutcome::Committed(3));
    assert_eq!(c.change_status(1).await.unwrap(), Some(ChangeStatus::SuccessExecuted));
    let o1 = c.get_entity(&Address::object("m", "O1")).await.unwrap().unwrap();
    assert_eq!(o1.revision, 1);
    let f = c.get_entity(&Address::field("m", "O1", "F")).await.unwrap().unwrap();
    assert_eq!(f.value(), Some(&Value::Integer(2)));
    assert_eq!(f.revision, 3);

    let event = c.get_event_at(1).await.unwrap().unwrap();
    assert!(event.is_transaction());
    assert_eq!(event.actor, Some(ActorId::new("A")));
    assert_eq!(c.current_revision().await.unwrap(), 3);
}

#[tokio::test]
async fn test_stalled_creating_writer_is_failed() {
    let (c, outcome) = run_stalled_writer_scenario(false).await;

    // A never happened, so F does not exist for C to change
    assert_eq!(outcome, CommandOutcome::Failed);
    assert_eq!(c.change_status(1).await.unwrap(), Some(ChangeStatus::FailedTimeout));
    assert!(c.get_entity(&Address::object("m", "O1")).await.unwrap().is_none());
    assert!(c.get_event_at(1).await.unwrap().is_none());
    assert!(c.get_event_at(2).await.unwrap().is_some());
    assert_eq!(c.current_revision().await.unwrap(), 3);
}
