//! Saga persistence step definitions.

use angzarr_mongo_persistence::{
    MongoPersistence, PersistenceError, SagaCorrelationProperty, StorageSession,
};
use cucumber::{given, then, when, World};
use uuid::Uuid;

use super::ShippingSagaData;
use crate::backend::{Settings, StorageBackend, StorageContext};

/// Test context for saga persistence scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct SagaWorld {
    backend: StorageBackend,
    context: Option<StorageContext>,
    saga_id: Option<Uuid>,
    session: Option<StorageSession>,
    loaded: Option<ShippingSagaData>,
    contenders: Vec<(StorageSession, ShippingSagaData)>,
    last_error: Option<PersistenceError>,
}

impl SagaWorld {
    fn new() -> Self {
        Self {
            backend: StorageBackend::from_env(),
            context: None,
            saga_id: None,
            session: None,
            loaded: None,
            contenders: Vec::new(),
            last_error: None,
        }
    }

    fn persistence(&self) -> &MongoPersistence {
        &self
            .context
            .as_ref()
            .expect("Storage context not initialized")
            .persistence
    }

    fn saga_id(&self) -> Uuid {
        self.saga_id.expect("No saga in this scenario")
    }

    async fn open(&self) -> StorageSession {
        self.persistence()
            .session_factory()
            .open()
            .await
            .expect("Failed to open session")
    }

    /// Current session, opening one if the previous was committed.
    async fn session(&mut self) -> &mut StorageSession {
        if self.session.is_none() {
            let session = self.open().await;
            self.session = Some(session);
        }
        self.session.as_mut().expect("session was just opened")
    }

    async fn save(&mut self, order_id: &str) -> ShippingSagaData {
        let saga = ShippingSagaData {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            packages: Vec::new(),
        };
        let correlation = SagaCorrelationProperty::new("order_id", order_id);
        let mut session = self.open().await;
        self.persistence()
            .sagas()
            .save(&saga, Some(&correlation), &mut session)
            .await
            .expect("Failed to save saga");
        self.saga_id = Some(saga.id);
        self.session = Some(session);
        saga
    }

    async fn load_by_id(&mut self) {
        let id = self.saga_id();
        let sagas = self.persistence().sagas().clone();
        let session = self.session().await;
        self.loaded = sagas
            .get::<ShippingSagaData>(id, session)
            .await
            .expect("Failed to load saga");
    }

    async fn commit(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.complete().await.expect("Failed to commit session");
        }
    }
}

// --- Background ---

#[given("a saga persistence backend")]
async fn given_saga_backend(world: &mut SagaWorld) {
    println!("Using backend: {}", world.backend.name());
    world.context = Some(StorageContext::new(world.backend, Settings::default()).await);
}

// --- Given steps ---

#[given("transactions are disabled")]
async fn given_transactions_disabled(world: &mut SagaWorld) {
    let settings = Settings {
        use_transactions: false,
        outbox: false,
        subscriptions: false,
    };
    world.context = Some(StorageContext::new(world.backend, settings).await);
}

#[given(expr = "a shipping saga for order {string} is saved")]
async fn given_saga_saved(world: &mut SagaWorld, order_id: String) {
    world.save(&order_id).await;
    world.commit().await;
}

// --- When steps ---

#[when("I load the saga by id")]
async fn when_load_by_id(world: &mut SagaWorld) {
    world.load_by_id().await;
}

#[when(expr = "I load the saga by order id {string}")]
async fn when_load_by_order_id(world: &mut SagaWorld, order_id: String) {
    let sagas = world.persistence().sagas().clone();
    let session = world.session().await;
    world.loaded = sagas
        .get_by_property::<ShippingSagaData, _>("order_id", order_id.as_str(), session)
        .await
        .expect("Failed to load saga");
}

#[when("I load a saga with an unknown id")]
async fn when_load_unknown(world: &mut SagaWorld) {
    world.saga_id = Some(Uuid::new_v4());
    world.load_by_id().await;
}

#[when(expr = "I add package {string} and update the saga")]
async fn when_add_package_and_update(world: &mut SagaWorld, package: String) {
    let mut saga = world.loaded.clone().expect("No saga loaded");
    saga.packages.push(package);
    let sagas = world.persistence().sagas().clone();
    let session = world.session().await;
    sagas.update(&saga, session).await.expect("Failed to update saga");
    world.loaded = Some(saga);
}

#[when("I commit the session")]
async fn when_commit(world: &mut SagaWorld) {
    world.commit().await;
}

#[when("I update the saga without loading it")]
async fn when_update_without_load(world: &mut SagaWorld) {
    let saga = ShippingSagaData {
        id: world.saga_id(),
        order_id: "unloaded".to_string(),
        packages: Vec::new(),
    };
    let sagas = world.persistence().sagas().clone();
    let session = world.session().await;
    world.last_error = sagas.update(&saga, session).await.err();
}

#[when("I load the saga through a session that was already committed")]
async fn when_load_in_committed_session(world: &mut SagaWorld) {
    let mut session = world.open().await;
    session.complete().await.expect("Failed to commit session");

    let id = world.saga_id();
    world.last_error = world
        .persistence()
        .sagas()
        .get::<ShippingSagaData>(id, &mut session)
        .await
        .err();
}

#[when("two sessions load the saga")]
async fn when_two_sessions_load(world: &mut SagaWorld) {
    let id = world.saga_id();
    for _ in 0..2 {
        let mut session = world.open().await;
        let saga = world
            .persistence()
            .sagas()
            .get::<ShippingSagaData>(id, &mut session)
            .await
            .expect("Failed to load saga")
            .expect("Saga should exist");
        world.contenders.push((session, saga));
    }
}

async fn contender_commits(world: &mut SagaWorld, index: usize, package: String) -> Result<(), PersistenceError> {
    let sagas = world.persistence().sagas().clone();
    let (session, saga) = &mut world.contenders[index];
    saga.packages.push(package);
    sagas.update(saga, session).await?;
    session.complete().await
}

#[when(expr = "the second session adds package {string} and commits")]
async fn when_second_commits(world: &mut SagaWorld, package: String) {
    contender_commits(world, 1, package)
        .await
        .expect("The second session should commit");
}

#[when(expr = "the first session adds package {string} and commits")]
async fn when_first_commits(world: &mut SagaWorld, package: String) {
    world.last_error = contender_commits(world, 0, package).await.err();
    for (mut session, _) in world.contenders.drain(..) {
        session.dispose().await;
    }
}

#[when("I complete the saga")]
async fn when_complete(world: &mut SagaWorld) {
    let saga = world.loaded.clone().expect("No saga loaded");
    let sagas = world.persistence().sagas().clone();
    let session = world.session().await;
    sagas.complete(&saga, session).await.expect("Failed to complete saga");
}

#[when(expr = "I save another shipping saga for order {string}")]
async fn when_save_duplicate(world: &mut SagaWorld, order_id: String) {
    let saga = ShippingSagaData {
        id: Uuid::new_v4(),
        order_id: order_id.clone(),
        packages: Vec::new(),
    };
    let correlation = SagaCorrelationProperty::new("order_id", order_id);
    let mut session = world.open().await;
    world.last_error = world
        .persistence()
        .sagas()
        .save(&saga, Some(&correlation), &mut session)
        .await
        .err();
    session.dispose().await;
}

#[when(expr = "I save a shipping saga for order {string} and dispose the session")]
async fn when_save_and_dispose(world: &mut SagaWorld, order_id: String) {
    world.save(&order_id).await;
    if let Some(mut session) = world.session.take() {
        session.dispose().await;
    }
}

// --- Then steps ---

#[then("the saga is found")]
async fn then_saga_found(world: &mut SagaWorld) {
    let loaded = world.loaded.as_ref().expect("Saga should be found");
    assert_eq!(loaded.id, world.saga_id());
}

#[then("no saga is found")]
async fn then_no_saga(world: &mut SagaWorld) {
    assert!(world.loaded.is_none(), "Expected no saga, got {:?}", world.loaded);
}

#[then(expr = "the loaded version is {int}")]
async fn then_loaded_version(world: &mut SagaWorld, version: i32) {
    let session = world.session.as_ref().expect("No open session");
    let loaded = session
        .version_of::<ShippingSagaData>()
        .expect("No version recorded");
    assert_eq!(loaded.value(), version);
}

#[then(expr = "the saga has packages {string}")]
async fn then_saga_packages(world: &mut SagaWorld, packages: String) {
    let loaded = world.loaded.as_ref().expect("No saga loaded");
    let expected: Vec<String> = packages.split(',').map(|p| p.trim().to_string()).collect();
    assert_eq!(loaded.packages, expected);
}

#[then("the operation fails because no version was loaded")]
async fn then_version_not_loaded(world: &mut SagaWorld) {
    assert!(
        matches!(world.last_error, Some(PersistenceError::VersionNotLoaded(_))),
        "Expected VersionNotLoaded, got {:?}",
        world.last_error
    );
}

#[then("the first session fails with a retryable error")]
async fn then_retryable(world: &mut SagaWorld) {
    let err = world.last_error.as_ref().expect("The first session should fail");
    assert!(err.is_retryable(), "Expected a retryable error, got {:?}", err);
}

#[then("the operation fails with a duplicate key error")]
async fn then_duplicate_key(world: &mut SagaWorld) {
    let err = world.last_error.as_ref().expect("The save should fail");
    assert!(err.is_duplicate_key(), "Expected a duplicate key error, got {:?}", err);
}

#[then("the operation fails because the session is closed")]
async fn then_session_closed(world: &mut SagaWorld) {
    assert!(
        matches!(world.last_error, Some(PersistenceError::SessionClosed)),
        "Expected SessionClosed, got {:?}",
        world.last_error
    );
}
