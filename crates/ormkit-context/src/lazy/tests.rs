//! Tests for the lazy internal context

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock, Weak};

use ormkit_connection::{
    ConnectionStringOrigin, DbConnectionInfo, EagerInternalConnection, EntityConnection,
    LazyInternalConnection,
};
use ormkit_core::{AppConfig, ContextType, EntitySet, EntityType, MetadataWorkspace};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::test_support::{
    BloggingContext, CountingInitializer, MOCK_PROVIDER, MockProviderFactory, mock_connection,
    mock_services,
};
use crate::DbContextInfo;

fn blogging(services: &Arc<ContextServices>, name: &str) -> (Arc<BloggingContext>, LazyInternalContext) {
    let owner = Arc::new(BloggingContext::default());
    let context = LazyInternalContext::new(owner.clone(), name, services.clone());
    (owner, context)
}

fn counting_initializer(services: &ContextServices) -> Arc<CountingInitializer> {
    let initializer = Arc::new(CountingInitializer::default());
    services
        .initializers()
        .set_initializer(ContextType::of::<BloggingContext>(), initializer.clone());
    initializer
}

fn shop_workspace() -> Arc<MetadataWorkspace> {
    Arc::new(MetadataWorkspace {
        namespace: "shop".into(),
        container_name: "ShopContext".into(),
        entity_types: vec![EntityType::new("Order")],
        entity_sets: vec![EntitySet::new("Orders", "Order")],
        default_schema: None,
    })
}

fn entity_connection() -> Arc<dyn DbConnection> {
    Arc::new(EntityConnection::new(shop_workspace(), mock_connection("shop")))
}

#[test]
fn test_model_is_shared_by_type_and_provider() {
    let (services, _) = mock_services();
    let owner = Arc::new(BloggingContext::default());
    let blogs = LazyInternalContext::new(owner.clone(), "Blogs", services.clone());
    let archive = LazyInternalContext::new(owner.clone(), "Archive", services.clone());

    blogs.initialize_context().unwrap();
    archive.initialize_context().unwrap();

    let first = blogs.code_first_model().unwrap().unwrap();
    let second = archive.code_first_model().unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(owner.model_creations.load(Ordering::SeqCst), 1);
    assert_eq!(services.model_cache().len(), 1);
}

#[test]
fn test_each_provider_gets_its_own_model() {
    let providers = Arc::new(
        ormkit_providers::ProviderRegistry::new()
            .with_provider(Arc::new(MockProviderFactory::new(MOCK_PROVIDER)))
            .with_provider(Arc::new(MockProviderFactory::new("OtherMock"))),
    );
    let config = AppConfig::new()
        .with_connection_string("Blogs", "Database=blogs", MOCK_PROVIDER)
        .with_connection_string("Other", "Database=blogs", "OtherMock");
    let services = Arc::new(ContextServices::new(providers).with_app_config(config));
    let owner = Arc::new(BloggingContext::default());

    let mock = LazyInternalContext::new(owner.clone(), "Blogs", services.clone());
    let other = LazyInternalContext::new(owner.clone(), "Other", services.clone());
    mock.initialize_context().unwrap();
    other.initialize_context().unwrap();

    let mock_model = mock.code_first_model().unwrap().unwrap();
    let other_model = other.code_first_model().unwrap().unwrap();
    assert_ne!(mock_model.id(), other_model.id());
    assert_eq!(other_model.provider_info().provider_invariant_name, "OtherMock");
    assert_eq!(owner.model_creations.load(Ordering::SeqCst), 2);
}

#[test]
fn test_model_hook_sees_conventions_and_runs_after_owner() {
    let (services, _) = mock_services();
    let (_, context) = blogging(&services, "Blogs");
    let hook: OnModelCreating = Arc::new(|builder: &mut ModelBuilder| {
        assert_eq!(builder.container_name(), Some("BloggingContext"));
        assert!(builder.entity_types().iter().any(|t| t.name == "Post"));
        builder.has_default_schema("blogging");
        Ok(())
    });
    context.set_on_model_creating(Some(hook)).unwrap();

    context.initialize_context().unwrap();

    let model = context.code_first_model().unwrap().unwrap();
    assert_eq!(model.workspace().namespace, "ormkit_context.test_support");
    assert_eq!(context.default_schema().unwrap().as_deref(), Some("blogging"));
}

#[test]
fn test_failed_model_build_is_retried() {
    let (services, _) = mock_services();
    let (owner, context) = blogging(&services, "Blogs");
    owner.failing_model_builds.store(1, Ordering::SeqCst);

    let err = context.initialize_context().unwrap_err();
    assert!(matches!(err, OrmError::Connection(_)));
    assert!(!context.is_context_initialized());
    assert_eq!(owner.model_creations.load(Ordering::SeqCst), 0);

    context.initialize_context().unwrap();
    assert!(context.is_context_initialized());
    assert_eq!(owner.model_creations.load(Ordering::SeqCst), 1);
}

/// Uses its own context while the model is being built
#[derive(Default)]
struct SelfReferencingContext {
    context: OnceLock<Weak<LazyInternalContext>>,
}

impl DbContext for SelfReferencingContext {
    fn on_model_creating(&self, builder: &mut ModelBuilder) -> Result<()> {
        if let Some(context) = self.context.get().and_then(Weak::upgrade) {
            context.initialize_context()?;
        }
        builder.entity(EntityType::new("Item"));
        Ok(())
    }
}

#[test]
fn test_context_used_while_creating_model_fails() {
    let (services, _) = mock_services();
    let owner = Arc::new(SelfReferencingContext::default());
    let context = Arc::new(LazyInternalContext::new(owner.clone(), "Blogs", services));
    owner.context.set(Arc::downgrade(&context)).unwrap();

    let err = context.initialize_context().unwrap_err();

    assert!(matches!(err, OrmError::ContextUsedInModelCreating(_)));
    assert!(!context.is_context_initialized());
}

#[test]
fn test_supplied_model_rejects_metadata_connection() {
    let (services, _) = mock_services();
    let model = {
        let (_, source) = blogging(&services, "Blogs");
        source.initialize_context().unwrap();
        source.code_first_model().unwrap().unwrap()
    };

    let context = LazyInternalContext::with_existing_connection(
        Arc::new(BloggingContext::default()),
        entity_connection(),
        true,
        Some(model),
        services,
    );

    let err = context.initialize_context().unwrap_err();
    assert!(matches!(err, OrmError::ConnectionHasModel(_)));
}

#[test]
fn test_supplied_model_is_used_without_building() {
    let (services, _) = mock_services();
    let mut builder = ModelBuilder::new().with_container_name("BloggingContext");
    builder.entity_set("Blogs", EntityType::new("Blog"));
    let model = Arc::new(
        builder
            .build(ormkit_core::DbProviderInfo::new(MOCK_PROVIDER, "mock-1"))
            .unwrap(),
    );
    let owner = Arc::new(BloggingContext::default());

    let context =
        LazyInternalContext::with_model(owner.clone(), "Blogs", model.clone(), services.clone());
    assert!(Arc::ptr_eq(&context.code_first_model().unwrap().unwrap(), &model));

    context.initialize_context().unwrap();
    assert_eq!(owner.model_creations.load(Ordering::SeqCst), 0);
    assert!(services.model_cache().is_empty());
}

#[test]
fn test_connection_model_is_used_without_building() {
    let (services, _) = mock_services();
    let owner = Arc::new(BloggingContext::default());
    let context = LazyInternalContext::with_existing_connection(
        owner.clone(),
        entity_connection(),
        true,
        None,
        services,
    );

    let pair = context.entity_set_and_base_type_for_type("Order").unwrap();

    assert_eq!(pair.entity_set.name, "Orders");
    assert!(context.code_first_model().unwrap().is_none());
    assert!(context.default_initializer().is_none());
    assert_eq!(owner.model_creations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_database_is_initialized_once_per_model_and_connection() {
    let (services, _) = mock_services();
    let initializer = counting_initializer(&services);

    let (_, first) = blogging(&services, "Blogs");
    let (_, second) = blogging(&services, "Blogs");
    first.initialize().unwrap();
    second.initialize().unwrap();
    first.initialize().unwrap();
    assert_eq!(initializer.runs.load(Ordering::SeqCst), 1);

    let (_, archive) = blogging(&services, "Archive");
    archive.initialize().unwrap();
    assert_eq!(initializer.runs.load(Ordering::SeqCst), 2);
    assert_eq!(services.initialized_databases().len(), 2);
}

#[test]
fn test_mark_database_not_initialized_rearms_initializer() {
    let (services, _) = mock_services();
    let initializer = counting_initializer(&services);
    let (_, context) = blogging(&services, "Blogs");

    context.initialize().unwrap();
    context.mark_database_not_initialized().unwrap();
    context.initialize().unwrap();

    assert_eq!(initializer.runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_mark_database_initialized_skips_initializer() {
    let (services, _) = mock_services();
    let initializer = counting_initializer(&services);
    let (_, context) = blogging(&services, "Blogs");

    context.mark_database_initialized().unwrap();
    context.initialize().unwrap();

    assert_eq!(initializer.runs.load(Ordering::SeqCst), 0);
    let key = context.initialization_key().unwrap();
    assert!(services.initialized_databases().is_initialized(&key));
}

#[test]
fn test_failed_initialization_is_wrapped_and_retried() {
    let (services, _) = mock_services();
    let initializer = counting_initializer(&services);
    initializer.failures.store(1, Ordering::SeqCst);
    let (_, context) = blogging(&services, "Blogs");

    let err = context.initialize().unwrap_err();
    match err {
        OrmError::DatabaseInitialization(inner) => {
            assert!(matches!(*inner, OrmError::Connection(_)));
        }
        other => panic!("expected a database initialization error, got {other:?}"),
    }
    assert!(context.is_context_initialized());

    context.initialize().unwrap();
    assert_eq!(initializer.runs.load(Ordering::SeqCst), 2);
}

struct NestedActionInitializer;

impl DatabaseInitializer for NestedActionInitializer {
    fn name(&self) -> &str {
        "NestedActionInitializer"
    }

    fn initialize_database(&self, context: &dyn InternalContext) -> Result<()> {
        context.set_auto_detect_changes_enabled(false);
        context.set_validate_on_save_enabled(false);
        context.perform_initialization_action(&mut || Err(OrmError::Data("disk full".into())))
    }
}

#[test]
fn test_nested_action_error_is_wrapped_once_and_flags_restored() {
    let (services, _) = mock_services();
    services.initializers().set_initializer(
        ContextType::of::<BloggingContext>(),
        Arc::new(NestedActionInitializer),
    );
    let (_, context) = blogging(&services, "Blogs");

    let err = context.initialize().unwrap_err();

    match err {
        OrmError::DatabaseInitialization(inner) => {
            assert!(matches!(*inner, OrmError::Data(_)));
        }
        other => panic!("expected a database initialization error, got {other:?}"),
    }
    assert!(context.auto_detect_changes_enabled());
    assert!(context.validate_on_save_enabled());
    assert!(!context.base().in_initialization_action());
}

/// Signals when it starts, then takes a while to finish
struct SlowInitializer {
    started: parking_lot::Mutex<Option<std::sync::mpsc::Sender<()>>>,
    finished: std::sync::atomic::AtomicBool,
}

impl DatabaseInitializer for SlowInitializer {
    fn name(&self) -> &str {
        "SlowInitializer"
    }

    fn initialize_database(&self, context: &dyn InternalContext) -> Result<()> {
        context.perform_initialization_action(&mut || {
            if let Some(started) = self.started.lock().take() {
                let _ = started.send(());
            }
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(())
        })?;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_concurrent_initialize_waits_for_running_initializer() {
    let (services, _) = mock_services();
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let initializer = Arc::new(SlowInitializer {
        started: parking_lot::Mutex::new(Some(started_tx)),
        finished: std::sync::atomic::AtomicBool::new(false),
    });
    services
        .initializers()
        .set_initializer(ContextType::of::<BloggingContext>(), initializer.clone());
    let (_, context) = blogging(&services, "Blogs");
    let context = Arc::new(context);

    let worker = {
        let context = context.clone();
        std::thread::spawn(move || context.initialize())
    };
    started_rx.recv().unwrap();

    // Another thread must not see the worker's flags as its own
    assert!(!context.base().in_initialization_action());
    context.initialize().unwrap();

    assert!(initializer.finished.load(Ordering::SeqCst));
    worker.join().unwrap().unwrap();
}

#[test]
fn test_flags_are_buffered_until_object_context_exists() {
    let (services, _) = mock_services();
    let (_, context) = blogging(&services, "Blogs");
    assert!(context.lazy_loading_enabled());
    assert!(context.proxy_creation_enabled());

    context.set_lazy_loading_enabled(false);
    context.set_proxy_creation_enabled(false);
    assert!(!context.lazy_loading_enabled());
    assert!(context.object_context_in_use().is_none());

    let object_context = context.object_context_without_database_initialization().unwrap();
    let options = object_context.options();
    assert!(!options.lazy_loading_enabled);
    assert!(!options.proxy_creation_enabled);
    assert!(options.use_consistent_null_reference_behavior);

    context.set_lazy_loading_enabled(true);
    assert!(object_context.options().lazy_loading_enabled);
}

#[test]
fn test_save_changes_before_initialization_saves_nothing() {
    let (services, store) = mock_services();
    let (_, context) = blogging(&services, "Blogs");

    assert_eq!(context.save_changes().unwrap(), 0);

    assert!(context.object_context_in_use().is_none());
    assert!(!store.database_created("blogs"));
}

#[test]
fn test_save_changes_validates_then_persists() {
    let (services, store) = mock_services();
    let (_, context) = blogging(&services, "Blogs");
    let object_context = context.object_context().unwrap();

    object_context.add("Post", "1", json!({"title": ""})).unwrap();
    let err = context.save_changes().unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    assert!(store.saved.lock().is_empty());

    object_context.update("Post", "1", json!({"title": "Hello"})).unwrap();
    assert_eq!(context.save_changes().unwrap(), 1);
    assert_eq!(store.saved.lock()[0].entity_set, "Posts");
}

#[test]
fn test_connection_cannot_be_replaced_after_initialization() {
    let (services, _) = mock_services();
    let (_, context) = blogging(&services, "Blogs");
    context.initialize_context().unwrap();

    let replacement = LazyInternalConnection::new(
        "Archive",
        services.connection_dependencies().clone(),
        services.app_config().clone(),
    );
    let err = context.override_connection(Arc::new(replacement)).unwrap_err();

    assert!(matches!(err, OrmError::ConnectionReplacedAfterInitialization(_)));
}

#[test]
fn test_override_connection_rejects_mixing_metadata_and_store_connections() {
    let (services, _) = mock_services();

    let (_, store_context) = blogging(&services, "Blogs");
    let metadata = EagerInternalConnection::new(entity_connection(), true, AppConfig::default().into());
    let err = store_context.override_connection(Arc::new(metadata)).unwrap_err();
    assert!(matches!(err, OrmError::CannotReplaceStoreConnectionWithEntityConnection));

    let metadata_context = LazyInternalContext::with_existing_connection(
        Arc::new(BloggingContext::default()),
        entity_connection(),
        true,
        None,
        services.clone(),
    );
    let plain = EagerInternalConnection::new(mock_connection("blogs"), true, AppConfig::default().into());
    let err = metadata_context.override_connection(Arc::new(plain)).unwrap_err();
    assert!(matches!(err, OrmError::CannotReplaceEntityConnectionWithStoreConnection));
}

#[test]
fn test_override_connection_takes_the_context_config() {
    let (services, _) = mock_services();
    let (_, context) = blogging(&services, "Blogs");
    let original = context.internal_connection();

    let replacement = LazyInternalConnection::new(
        "Archive",
        services.connection_dependencies().clone(),
        Arc::new(AppConfig::default()),
    );
    context.override_connection(Arc::new(replacement)).unwrap();

    assert_eq!(context.connection().unwrap().database(), "archive");
    assert_eq!(
        context.connection_string_origin().unwrap(),
        ConnectionStringOrigin::Configuration
    );
    assert_eq!(
        original.lifecycle(),
        ormkit_connection::ConnectionLifecycle::Uninitialized
    );
}

#[test]
fn test_context_info_is_applied_once_and_disables_initializer() {
    let (services, _) = mock_services();
    let initializer = counting_initializer(&services);
    let (_, context) = blogging(&services, "Blogs");

    let info = DbContextInfo::new()
        .with_connection_info(DbConnectionInfo::named("Archive"))
        .with_model_provider_info(ormkit_core::DbProviderInfo::new(MOCK_PROVIDER, "mock-2"));
    context.apply_context_info(&info).unwrap();
    context
        .apply_context_info(&DbContextInfo::new().with_connection_info(DbConnectionInfo::named("Blogs")))
        .unwrap();

    assert!(context.base().initializer_disabled());
    assert_eq!(context.connection().unwrap().database(), "archive");
    assert_eq!(
        context.connection_string_origin().unwrap(),
        ConnectionStringOrigin::DbContextInfo
    );

    context.initialize().unwrap();
    assert_eq!(initializer.runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        context.code_first_model().unwrap().unwrap().provider_info().provider_manifest_token,
        "mock-2"
    );
}

#[test]
fn test_dispose_releases_connection_and_object_context() {
    let (services, _) = mock_services();
    let (_, context) = blogging(&services, "Blogs");
    let object_context = context.object_context_without_database_initialization().unwrap();
    let connection = context.connection().unwrap();

    context.dispose_context();
    context.dispose_context();

    assert!(context.is_disposed());
    assert!(connection.is_disposed());
    assert!(object_context.is_disposed());
    assert!(matches!(context.connection(), Err(OrmError::ContextDisposed(_))));
    assert!(matches!(context.initialize_context(), Err(OrmError::ContextDisposed(_))));
    assert!(matches!(context.save_changes(), Err(OrmError::ContextDisposed(_))));
}

#[test]
fn test_entity_set_lookup_uses_root_type_set() {
    let (services, _) = mock_services();
    let (_, context) = blogging(&services, "Blogs");

    let pair = context.entity_set_and_base_type_for_type("FeaturedBlog").unwrap();
    assert_eq!(pair.entity_set.name, "Blogs");
    assert_eq!(pair.base_type, "Blog");

    let err = context.entity_set_and_base_type_for_type("Comment").unwrap_err();
    assert!(matches!(err, OrmError::EntityTypeNotInModel(_)));
}

#[test]
fn test_code_first_model_initializes_the_context() {
    let (services, _) = mock_services();
    let (owner, context) = blogging(&services, "Blogs");
    assert!(!context.is_context_initialized());

    let model = context.code_first_model().unwrap().unwrap();

    assert!(context.is_context_initialized());
    assert_eq!(model.default_schema(), Some("blogging"));
    assert_eq!(context.default_schema().unwrap().as_deref(), Some("blogging"));
    assert_eq!(owner.model_creations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_compatibility_check_on_fresh_context_builds_the_model() {
    let (services, store) = mock_services();
    let (_, first) = blogging(&services, "Blogs");
    first.initialize_context().unwrap();
    first.save_metadata_to_database().unwrap();
    assert!(!store.hashes.lock().is_empty());

    let (_, fresh) = blogging(&services, "Blogs");
    assert!(!fresh.is_context_initialized());

    assert!(fresh.compatible_with_model(true).unwrap());
    assert!(fresh.is_context_initialized());
}

#[test]
fn test_default_initializer_needs_code_first_model() {
    let (services, _) = mock_services();
    let (_, context) = blogging(&services, "Blogs");
    assert!(context.default_initializer().is_none());

    context.initialize_context().unwrap();
    let initializer = context.default_initializer().unwrap();
    assert_eq!(initializer.name(), crate::CREATE_DATABASE_IF_NOT_EXISTS);
}
