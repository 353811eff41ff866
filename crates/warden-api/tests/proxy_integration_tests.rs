//! End-to-end proxy tests: a real upstream on an ephemeral port, rules
//! loaded from disk and in-memory metadata and relation stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use warden_api::errors::ErrorConfig;
use warden_api::proxy::{
    proxy_router, AuthzHook, Enforcer, HookRegistry, ProxyState, RuleMatcher, Transport,
};
use warden_domain::model::{Organization, Project, User};
use warden_domain::registry::DefinitionsDocument;
use warden_domain::{ObjectRef, RelationAdapter, RelationTuple, Registry, SubjectRef};
use warden_server::{Bootstrap, PermissionResolver, RelationService, ResourceService, UserService};
use warden_storage::{FsBlobStore, MemoryMetadataStore, MemoryRelationStore, ResourceFilter};

const DEFINITIONS: &str = r#"
namespaces:
  - id: entropy/firehose
    resource: true
    permissions:
      - id: view
"#;

const IDENTITY: &str = "x-warden-email";
const USER_ID: &str = "x-warden-user-id";

#[derive(Clone, Default)]
struct Upstream {
    hits: Arc<AtomicUsize>,
    user_ids: Arc<Mutex<Vec<String>>>,
}

async fn create_firehose(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(id) = headers.get(USER_ID).and_then(|v| v.to_str().ok()) {
        upstream.user_ids.lock().unwrap().push(id.to_string());
    }
    Json(json!({"name": body["name"], "project": body["project"]}))
}

async fn spawn_upstream() -> (String, Upstream) {
    let upstream = Upstream::default();
    let app = Router::new()
        .route("/api/firehoses", post(create_firehose))
        .with_state(upstream.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), upstream)
}

fn rules(upstream: &str) -> String {
    format!(
        r#"rules:
  - name: create-firehose
    path: /api/firehoses
    methods: [POST]
    backend:
      namespace: entropy
      upstream: {upstream}
    middlewares:
      - name: authz
        config:
          attributes:
            project: {{type: json_payload, key: project}}
          permissions:
            - {{name: edit, namespace: project, attribute: project}}
    hooks:
      - name: authz
        config:
          attributes:
            resource: {{type: json_payload, key: name, source: response}}
            resource_type: {{type: constant, value: firehose}}
"#
    )
}

struct Harness {
    app: Router,
    upstream: Upstream,
    adapter: Arc<dyn RelationAdapter>,
    resources: Arc<ResourceService>,
    alice: User,
    _rules: tempfile::TempDir,
}

async fn harness() -> Harness {
    let (url, upstream) = spawn_upstream().await;
    let adapter: Arc<dyn RelationAdapter> = MemoryRelationStore::new_shared();
    let repositories = MemoryMetadataStore::new().repositories();
    let registry =
        Registry::from_definitions(DefinitionsDocument::from_yaml(DEFINITIONS).unwrap()).unwrap();
    Bootstrap::new(repositories.clone(), adapter.clone())
        .publish(&registry)
        .await
        .unwrap();

    let organization = repositories
        .organizations
        .create(Organization::new("Acme", "acme"))
        .await
        .unwrap();
    let foo = repositories
        .projects
        .create(Project::new("Foo", "foo", &organization.id))
        .await
        .unwrap();
    repositories
        .projects
        .create(Project::new("Xx", "xx", &organization.id))
        .await
        .unwrap();
    let alice = repositories
        .users
        .create(User::new("Alice", "alice@acme.io"))
        .await
        .unwrap();
    adapter
        .write(&RelationTuple::new(
            ObjectRef::new("project", &foo.id),
            "owner",
            SubjectRef::new("user", &alice.id),
        ))
        .await
        .unwrap();

    let resolver = Arc::new(PermissionResolver::new(repositories.clone(), adapter.clone()));
    let relations = Arc::new(RelationService::new(
        repositories.relations.clone(),
        adapter.clone(),
    ));
    let resources = Arc::new(ResourceService::new(
        repositories.resources.clone(),
        resolver.clone(),
        relations,
    ));

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("firehoses.yaml"), rules(&url)).unwrap();
    let matcher = RuleMatcher::load("entropy", Arc::new(FsBlobStore::new(dir.path())))
        .await
        .unwrap();

    let state = ProxyState {
        matcher: Arc::new(matcher),
        enforcer: Arc::new(Enforcer::new(
            Arc::new(UserService::new(repositories.users.clone())),
            resolver,
            HeaderName::from_static(IDENTITY),
            ErrorConfig::development(),
        )),
        transport: Arc::new(
            Transport::new(Duration::from_secs(5), HeaderName::from_static(USER_ID)).unwrap(),
        ),
        hooks: Arc::new(HookRegistry::new().register(Arc::new(AuthzHook::new(resources.clone())))),
        body_limit: 64 * 1024,
    };

    Harness {
        app: proxy_router(state),
        upstream,
        adapter,
        resources,
        alice,
        _rules: dir,
    }
}

fn create_request(identity: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post("/api/firehoses").header("content-type", "application/json");
    if let Some(identity) = identity {
        builder = builder.header(IDENTITY, identity);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_allowed_request_reaches_upstream_and_registers_resource() {
    let harness = harness().await;

    let (status, body) = send(
        &harness.app,
        create_request(
            Some("alice@acme.io"),
            json!({"project": "foo", "name": "fh-1"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "fh-1");
    assert_eq!(harness.upstream.hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        *harness.upstream.user_ids.lock().unwrap(),
        vec![harness.alice.id.clone()]
    );

    let created = harness
        .resources
        .list(&ResourceFilter {
            namespace_id: Some("entropy/firehose".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "fh-1");
    assert_eq!(created[0].owner_user_id, harness.alice.id);

    let owners = harness
        .adapter
        .lookup_subjects(
            &ObjectRef::new("entropy/firehose", &created[0].id),
            "view",
            "user",
        )
        .await
        .unwrap();
    assert_eq!(owners, vec![harness.alice.id.clone()]);
}

#[tokio::test]
async fn test_project_without_access_is_denied_before_upstream() {
    let harness = harness().await;

    let (status, _) = send(
        &harness.app,
        create_request(
            Some("alice@acme.io"),
            json!({"project": "xx", "name": "fh-2"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(harness.upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let harness = harness().await;

    let (status, _) = send(
        &harness.app,
        create_request(
            Some("alice@acme.io"),
            json!({"project": "missing", "name": "fh-3"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(harness.upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_identity_is_unauthenticated() {
    let harness = harness().await;

    let (status, _) = send(
        &harness.app,
        create_request(None, json!({"project": "foo", "name": "fh-4"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(harness.upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unmatched_path_is_not_proxied() {
    let harness = harness().await;

    let (status, _) = send(
        &harness.app,
        Request::get("/api/other").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(harness.upstream.hits.load(Ordering::SeqCst), 0);
}
