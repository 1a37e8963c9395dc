//! Unit tests for metadata derivation, the result cache, configuration,
//! notifications and upstream selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use fluxcodec::CodecRegistry;
use fluxcodec::JsonCodec;
use fluxcodec::TypeDesc;
use fluxcodec::Value;
use fluxmeta::CompositeMetadata;
use fluxmeta::MessageTags;
use fluxmeta::MimeType;
use fluxmeta::SegmentMime;
use fluxmeta::ServiceLocator;
use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use parking_lot::Mutex;
use tracing_test::traced_test;

use crate::Error;
use crate::ErrorKind;
use crate::builder::ProxyBuilder;
use crate::cache::ResultCache;
use crate::config;
use crate::config::CacheConfig;
use crate::config::RequesterConfig;
use crate::context;
use crate::context::CallContext;
use crate::interface;
use crate::interface::InterfaceDescriptor;
use crate::interface::MethodDescriptor;
use crate::listener::InvalidationListener;
use crate::listener::Notification;
use crate::metadata;
use crate::metadata::DeriveContext;
use crate::metadata::InteractionPattern;
use crate::metadata::MethodMetadata;
use crate::metadata::ReplyShape;
use crate::mock_transport::MockTransport;
use crate::reply::Reply;
use crate::reply::SharedResult;
use crate::transport;
use crate::transport::Transport;
use crate::upstream::RoundRobinCluster;
use crate::upstream::SingleConnection;
use crate::upstream::UpstreamCluster;
use crate::upstream::UpstreamManager;

// ============================================================================
//  HELPERS
// ============================================================================

fn derive_with(
    method: &MethodDescriptor,
    registry: &CodecRegistry,
    interface_encoding: Option<MimeType>,
    accept: &[MimeType],
) -> metadata::Result<MethodMetadata> {
    let locator = ServiceLocator::new("", "com.example.UserService", "1.0.0");
    MethodMetadata::derive(
        method,
        DeriveContext {
            locator: &locator,
            endpoint: None,
            interface_encoding,
            default_encoding: MimeType::Json,
            accept,
            registry,
        },
    )
}

fn derive(method: &MethodDescriptor) -> metadata::Result<MethodMetadata> {
    derive_with(method, &CodecRegistry::with_defaults(), None, &[])
}

type Call = BoxFuture<'static, crate::Result<Option<Value>>>;

fn ready(value: Option<Value>) -> SharedResult {
    futures::future::ready(Ok(value)).boxed().shared()
}

// ============================================================================
//  INTERFACES
// ============================================================================

#[test]
fn test_interface_rejects_duplicate_methods() {
    let err = InterfaceDescriptor::builder("UserService")
        .method(MethodDescriptor::new("find"))
        .method(MethodDescriptor::new("find"))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        interface::Error::DuplicateMethod { interface: "UserService".into(), method: "find".into() }
    );
    assert_eq!(InterfaceDescriptor::builder("").build().unwrap_err(), interface::Error::EmptyName);
}

#[test]
fn test_method_signature() {
    let m = MethodDescriptor::new("findById").param(TypeDesc::Int).returns_single(TypeDesc::Any);
    assert_eq!(m.signature(), "findById(int) -> single<any>");

    let m = MethodDescriptor::new("chat")
        .param(TypeDesc::String)
        .stream_param(TypeDesc::list(TypeDesc::Int))
        .returns_stream(TypeDesc::String);
    assert_eq!(m.signature(), "chat(string, stream<list<int>>) -> stream<string>");
}

// ============================================================================
//  METADATA DERIVATION
// ============================================================================

#[test]
fn test_pattern_follows_declared_shape() {
    let cases = [
        (MethodDescriptor::new("save").param(TypeDesc::Any), InteractionPattern::FireAndForget),
        (
            MethodDescriptor::new("find").param(TypeDesc::Int).returns_single(TypeDesc::Any),
            InteractionPattern::RequestResponse,
        ),
        (
            MethodDescriptor::new("list").param(TypeDesc::Int).returns_stream(TypeDesc::Any),
            InteractionPattern::RequestStream,
        ),
        (
            MethodDescriptor::new("echo").stream_param(TypeDesc::Any).returns_stream(TypeDesc::Any),
            InteractionPattern::RequestChannel,
        ),
        (
            MethodDescriptor::new("chat")
                .param(TypeDesc::String)
                .stream_param(TypeDesc::Any)
                .returns_stream(TypeDesc::Any),
            InteractionPattern::RequestChannel,
        ),
    ];
    for (method, expected) in cases {
        let meta = derive(&method).unwrap();
        assert_eq!(meta.pattern, expected, "{}", method.signature());
        assert_eq!(meta.shape, expected.reply_shape());
    }
}

#[test]
fn test_unsupported_shapes_are_rejected() {
    let bad = [
        MethodDescriptor::new("a").stream_param(TypeDesc::Any).param(TypeDesc::Int).returns_stream(TypeDesc::Any),
        MethodDescriptor::new("b").stream_param(TypeDesc::Any).returns_single(TypeDesc::Any),
        MethodDescriptor::new("c").stream_param(TypeDesc::Any),
        MethodDescriptor::new("d")
            .param(TypeDesc::Int)
            .param(TypeDesc::Int)
            .stream_param(TypeDesc::Any)
            .returns_stream(TypeDesc::Any),
    ];
    for method in bad {
        match derive(&method) {
            Err(metadata::Error::UnsupportedShape { method: name, .. }) => assert_eq!(name, method.name),
            other => panic!("{}: expected UnsupportedShape, got {other:?}", method.signature()),
        }
    }
}

#[test]
fn test_cache_name_only_on_single_response() {
    let method = MethodDescriptor::new("list").returns_stream(TypeDesc::Any).cacheable("user");
    assert_eq!(derive(&method).unwrap_err(), metadata::Error::NotCacheable { method: "list".into() });

    let method = MethodDescriptor::new("find").param(TypeDesc::Int).returns_single(TypeDesc::Any).cacheable("user");
    assert!(derive(&method).unwrap().is_cacheable());
}

#[test]
fn test_encoding_precedence() {
    let registry = CodecRegistry::with_defaults();
    let plain = MethodDescriptor::new("find").returns_single(TypeDesc::Any);

    let meta = derive_with(&plain, &registry, None, &[]).unwrap();
    assert_eq!(meta.param_mime, MimeType::Json);

    let meta = derive_with(&plain, &registry, Some(MimeType::Cbor), &[]).unwrap();
    assert_eq!(meta.param_mime, MimeType::Cbor);
    assert_eq!(meta.codec.mime_type(), MimeType::Cbor);

    let pinned = plain.clone().encoding(MimeType::Text);
    let meta = derive_with(&pinned, &registry, Some(MimeType::Cbor), &[]).unwrap();
    assert_eq!(meta.param_mime, MimeType::Text);
}

#[test]
fn test_accept_precedence() {
    let registry = CodecRegistry::with_defaults();
    let plain = MethodDescriptor::new("find").returns_single(TypeDesc::Any);

    let meta = derive_with(&plain, &registry, Some(MimeType::Cbor), &[]).unwrap();
    assert_eq!(meta.accept, vec![MimeType::Cbor, MimeType::Json, MimeType::Text, MimeType::Binary]);

    let meta = derive_with(&plain, &registry, None, &[MimeType::Text]).unwrap();
    assert_eq!(meta.accept, vec![MimeType::Text]);

    let declared = plain.accept([MimeType::Binary, MimeType::Json]);
    let meta = derive_with(&declared, &registry, None, &[MimeType::Text]).unwrap();
    assert_eq!(meta.accept, vec![MimeType::Binary, MimeType::Json]);
}

#[test]
fn test_unregistered_mimes_fail_derivation() {
    let registry = CodecRegistry::builder().with_codec(JsonCodec).build();

    let method = MethodDescriptor::new("find").encoding(MimeType::Cbor);
    assert_eq!(
        derive_with(&method, &registry, None, &[]).unwrap_err(),
        metadata::Error::UnregisteredCodec { method: "find".into(), mime: MimeType::Cbor }
    );

    let method = MethodDescriptor::new("find").accept([MimeType::Json, MimeType::Protobuf]);
    assert_eq!(
        derive_with(&method, &registry, None, &[]).unwrap_err(),
        metadata::Error::UnregisteredCodec { method: "find".into(), mime: MimeType::Protobuf }
    );
}

#[test]
fn test_prebuilt_metadata() {
    let method = MethodDescriptor::new("findById").param(TypeDesc::Int).returns_single(TypeDesc::Any);
    let meta = derive(&method).unwrap();

    let composite = CompositeMetadata::parse(&meta.metadata).unwrap();
    assert_eq!(composite.len(), 3);

    let route = composite.route().unwrap().unwrap();
    assert_eq!(route.method, "findById");
    assert_eq!(route.locator.service_name(), "com.example.UserService");
    assert_eq!(route.locator.version(), "1.0.0");
    assert_eq!(composite.message_mime_type().unwrap(), Some(SegmentMime::Known(MimeType::Json)));

    let accept = composite.accept_mime_types().unwrap().unwrap();
    let accepted: Vec<_> = accept.iter().filter_map(SegmentMime::well_known).collect();
    assert_eq!(accepted, meta.accept);
}

#[test]
fn test_metric_labels() {
    let method = MethodDescriptor::new("findById").param(TypeDesc::Int).returns_single(TypeDesc::Any);
    let meta = derive(&method).unwrap();
    let labels: Vec<(&str, &str)> = meta.labels.iter().map(|l| (l.key(), l.value())).collect();
    assert_eq!(
        labels,
        vec![
            ("service", "com.example.UserService:1.0.0"),
            ("method", "findById"),
            ("signature", "findById(int) -> single<any>"),
            ("pattern", "request_response"),
        ]
    );
}

/// Sums counter increments by `name/method`.
#[derive(Default)]
struct CountingRecorder {
    totals: Arc<Mutex<HashMap<String, u64>>>,
}

struct Tally {
    key: String,
    totals: Arc<Mutex<HashMap<String, u64>>>,
}

impl metrics::CounterFn for Tally {
    fn increment(&self, value: u64) {
        *self.totals.lock().entry(self.key.clone()).or_default() += value;
    }

    fn absolute(&self, value: u64) {
        self.totals.lock().insert(self.key.clone(), value);
    }
}

impl metrics::Recorder for CountingRecorder {
    fn describe_counter(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
    fn describe_gauge(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
    fn describe_histogram(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

    fn register_counter(&self, key: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
        let method = key.labels().find(|l| l.key() == "method").map(|l| l.value().to_string()).unwrap_or_default();
        metrics::Counter::from_arc(Arc::new(Tally {
            key: format!("{}/{method}", key.name()),
            totals: Arc::clone(&self.totals),
        }))
    }

    fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
        metrics::Gauge::noop()
    }

    fn register_histogram(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Histogram {
        metrics::Histogram::noop()
    }
}

#[test]
fn test_request_counter_moves_on_completion() {
    let recorder = CountingRecorder::default();
    let totals = Arc::clone(&recorder.totals);
    let count = |method: &str| totals.lock().get(&format!("fluxrpc.requests/{method}")).copied().unwrap_or(0);
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let interface = InterfaceDescriptor::builder("com.example.UserService")
                .method(MethodDescriptor::new("findById").param(TypeDesc::Int).returns_single(TypeDesc::Any))
                .method(MethodDescriptor::new("list").param(TypeDesc::Int).returns_stream(TypeDesc::Any))
                .build()
                .unwrap();
            let proxy = ProxyBuilder::new(interface).transport(MockTransport::new().into_shared()).build().unwrap();

            let pending = proxy.invoke("findById", Value::from(1)).unwrap();
            assert_eq!(count("findById"), 0);
            pending.single().await.unwrap();
            proxy.call("findById", Value::from(2)).await.unwrap();
            assert_eq!(count("findById"), 2);

            let items: Vec<_> = proxy.invoke("list", Value::from(3)).unwrap().into_stream().unwrap().collect().await;
            assert_eq!(items.len(), 1);
            assert_eq!(count("list"), 1);
        })
    });
}

// ============================================================================
//  RESULT CACHE
// ============================================================================

#[test]
fn test_cache_key_format() {
    assert_eq!(ResultCache::cache_key("user", &[]), "user:0");
    let one = Value::from(42);
    assert_eq!(
        ResultCache::cache_key("user", std::slice::from_ref(&one)),
        format!("user:{}", fluxcodec::hash_value(&one))
    );
}

#[tokio::test]
async fn test_cache_hit_returns_stored_result() {
    let cache = ResultCache::with_capacity(8, Duration::from_secs(60));
    let stored = ready(Some(Value::from("alice")));
    cache.put("user:1", stored.clone());

    let hit = cache.get("user:1").unwrap();
    assert!(Shared::ptr_eq(&hit, &stored));
    assert_eq!(hit.await.unwrap(), Some(Value::from("alice")));
    assert!(cache.get("user:2").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cache_ttl_counts_from_write() {
    let cache = ResultCache::with_capacity(8, Duration::from_secs(300));
    cache.put("user:1", ready(Some(Value::from(1))));

    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(cache.get("user:1").is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.get("user:1").is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_cache_evicts_least_recently_used() {
    let cache = ResultCache::with_capacity(2, Duration::from_secs(60));
    cache.put("a", ready(Some(Value::from(1))));
    cache.put("b", ready(Some(Value::from(2))));
    assert!(cache.get("a").is_some());
    cache.put("c", ready(Some(Value::from(3))));

    assert_eq!(cache.len(), 2);
    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());
    assert!(cache.get("c").is_some());
}

#[test]
fn test_invalidating_absent_keys_is_a_no_op() {
    let cache = ResultCache::with_capacity(8, Duration::from_secs(60));
    cache.put("user:1", ready(Some(Value::from(1))));

    assert!(!cache.invalidate("user:2"));
    assert_eq!(cache.invalidate_all(["user:3", "user:1", "user:1"]), 1);
    assert!(cache.is_empty());
    assert_eq!(cache.invalidate_all(Vec::<String>::new()), 0);
}

#[tokio::test]
async fn test_concurrent_misses_share_one_call() {
    let cache = Arc::new(ResultCache::with_capacity(8, Duration::from_secs(60)));
    let started = AtomicUsize::new(0);
    let start = || -> crate::Result<Call> {
        started.fetch_add(1, Ordering::SeqCst);
        Ok(async { Ok(Some(Value::from("alice"))) }.boxed())
    };

    let first = cache.get_or_start("user:1".into(), start).unwrap();
    let second = cache.get_or_start("user:1".into(), start).unwrap();
    assert!(Shared::ptr_eq(&first, &second));
    assert_eq!(cache.in_flight(), 1);

    assert_eq!(first.clone().await.unwrap(), Some(Value::from("alice")));
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);

    let third = cache.get_or_start("user:1".into(), start).unwrap();
    assert!(Shared::ptr_eq(&first, &third));
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_only_values_are_published() {
    let cache = Arc::new(ResultCache::with_capacity(8, Duration::from_secs(60)));

    let empty = cache.get_or_start("k:empty".into(), || Ok(async { Ok(None) }.boxed())).unwrap();
    assert_eq!(empty.await.unwrap(), None);

    let failed = cache
        .get_or_start("k:err".into(), || {
            Ok(async { Err(Error::Timeout(Duration::from_millis(5))) }.boxed())
        })
        .unwrap();
    assert!(failed.await.is_err());

    assert!(cache.is_empty());
    assert_eq!(cache.in_flight(), 0);
}

#[test]
fn test_start_errors_are_returned_without_marking_in_flight() {
    let cache = Arc::new(ResultCache::default());
    let err = cache
        .get_or_start("k".into(), || Err(Error::BadArguments { method: "m".into(), details: "x".into() }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(cache.in_flight(), 0);
}

// ============================================================================
//  CONFIGURATION
// ============================================================================

#[test]
fn test_config_from_toml() {
    let config = RequesterConfig::from_toml(
        r#"
        [proxy]
        group = "blue"
        service = "com.example.UserService"
        version = "1.0.0"
        encoding = "cbor"
        accept = ["application/json", "text"]
        timeout_ms = 1500

        [cache]
        max_entries = 10
        "#,
    )
    .unwrap();

    assert_eq!(config.proxy.group.as_deref(), Some("blue"));
    assert_eq!(config.proxy.encoding, MimeType::Cbor);
    assert_eq!(config.proxy.accept, vec![MimeType::Json, MimeType::Text]);
    assert_eq!(config.proxy.timeout(), Duration::from_millis(1500));
    assert_eq!(config.cache.max_entries, 10);
    assert_eq!(config.cache.ttl(), Duration::from_secs(config::DEFAULT_CACHE_TTL_SECS));
}

#[test]
fn test_config_defaults() {
    let config = RequesterConfig::from_toml("[proxy]\nservice = \"Echo\"\n").unwrap();
    assert_eq!(config.proxy.encoding, MimeType::Json);
    assert!(config.proxy.accept.is_empty());
    assert_eq!(config.proxy.timeout_ms, 3000);
    assert_eq!(config.cache, CacheConfig::default());
    assert_eq!(config.cache.max_entries, 500_000);
}

#[test]
fn test_config_rejects_bad_input() {
    assert!(matches!(RequesterConfig::from_toml("[proxy]\n"), Err(config::Error::Invalid { field: "service", .. })));
    assert!(matches!(
        RequesterConfig::from_toml("[proxy]\nservice = \"a\"\ntimeout_ms = 0\n"),
        Err(config::Error::Invalid { field: "timeout_ms", .. })
    ));
    assert!(matches!(
        RequesterConfig::from_toml("[proxy]\nservice = \"a\"\nencoding = \"yaml\"\n"),
        Err(config::Error::Toml(_))
    ));
}

// ============================================================================
//  NOTIFICATIONS
// ============================================================================

#[test]
fn test_parse_notifications() {
    let n = Notification::from_json(
        br#"{"type":"com.example.UpstreamClusterChangedEvent",
             "data":{"group":"blue","interfaceName":"com.example.UserService","version":"1.0.0",
                     "uris":["tcp://10.0.0.1:42252","tcp://10.0.0.2:42252"]}}"#,
    )
    .unwrap();
    assert_eq!(
        n,
        Notification::UpstreamChanged {
            service_id: "blue:com.example.UserService:1.0.0".into(),
            uris: vec!["tcp://10.0.0.1:42252".into(), "tcp://10.0.0.2:42252".into()],
        }
    );

    let n = Notification::from_json(br#"{"type":"com.example.INVALIDCACHEEVENT","data":{"keys":["user:1"]}}"#)
        .unwrap();
    assert_eq!(n, Notification::InvalidateCache { keys: vec!["user:1".into()] });

    let n = Notification::from_json(br#"{"type":"com.example.AppStatusEvent","data":{}}"#).unwrap();
    assert_eq!(n, Notification::Other { kind: "com.example.AppStatusEvent".into() });

    assert!(Notification::from_json(b"{").is_err());
    assert!(Notification::from_json(br#"{"type":"x.UpstreamClusterChangedEvent","data":{"uris":[]}}"#).is_err());
}

#[test]
#[traced_test]
fn test_listener_applies_invalidations() {
    let cache = Arc::new(ResultCache::with_capacity(8, Duration::from_secs(60)));
    cache.put("user:1", ready(Some(Value::from(1))));
    cache.put("user:2", ready(Some(Value::from(2))));

    let evicted: Arc<Mutex<Vec<(String, u64)>>> = Arc::default();
    let sink = Arc::clone(&evicted);
    let listener = InvalidationListener::new(Arc::clone(&cache))
        .with_external(Arc::new(move |name: &str, hash: u64| sink.lock().push((name.to_string(), hash))));

    listener.handle(Notification::InvalidateCache { keys: vec!["user:1".into(), "user:x".into(), "nohash".into()] });
    listener.handle(Notification::InvalidateCache { keys: vec!["user:1".into()] });

    assert!(cache.get("user:1").is_none());
    assert!(cache.get("user:2").is_some());
    assert_eq!(*evicted.lock(), vec![("user".to_string(), 1), ("user".to_string(), 1)]);
    assert!(logs_contain("malformed key"));
}

#[test]
#[traced_test]
fn test_listener_applies_topology_changes() {
    let connects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connects);
    let connector = Arc::new(move |_: &str| -> transport::Result<Arc<dyn Transport>> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransport::new().into_shared())
    });
    let cluster = Arc::new(RoundRobinCluster::new("com.example.UserService", connector, vec!["tcp://a".into()]));
    let manager = Arc::new(UpstreamManager::new());
    manager.add(cluster.clone());

    let listener = InvalidationListener::new(Arc::new(ResultCache::default())).with_upstreams(Arc::clone(&manager));
    listener.handle(Notification::UpstreamChanged {
        service_id: "com.example.UserService".into(),
        uris: vec!["tcp://a".into(), "tcp://b".into()],
    });
    assert_eq!(cluster.uris(), vec!["tcp://a".to_string(), "tcp://b".to_string()]);
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert!(logs_contain("upstream cluster changed"));

    listener.handle(Notification::UpstreamChanged { service_id: "com.example.Other".into(), uris: vec![] });
    assert!(logs_contain("no cluster"));
}

// ============================================================================
//  UPSTREAMS
// ============================================================================

#[test]
fn test_round_robin_rotates_and_skips_failed_connects() {
    let connector = Arc::new(|uri: &str| -> transport::Result<Arc<dyn Transport>> {
        if uri.contains("down") {
            Err(transport::Error::ConnectionLost(uri.to_string()))
        } else {
            Ok(MockTransport::new().into_shared())
        }
    });
    let cluster = RoundRobinCluster::new(
        "svc",
        connector,
        vec!["tcp://a".into(), "tcp://down".into(), "tcp://b".into(), "tcp://a".into()],
    );
    assert_eq!(cluster.len(), 2);

    let first = cluster.pick().unwrap();
    let second = cluster.pick().unwrap();
    let third = cluster.pick().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));

    cluster.set_uris(vec![]);
    assert_eq!(cluster.pick().err(), Some(transport::Error::NoLiveConnection("svc".into())));
}

#[test]
fn test_manager_falls_back_to_default_cluster() {
    let broker: Arc<dyn UpstreamCluster> = Arc::new(SingleConnection::new("broker", MockTransport::new().into_shared()));
    let manager = UpstreamManager::new().with_default(Arc::clone(&broker));
    assert!(manager.pick_connection("com.example.UserService").is_ok());
    assert!(manager.get("com.example.UserService").is_none());
    assert!(!manager.refresh("com.example.UserService", vec!["tcp://a".into()]));

    let bare = UpstreamManager::new();
    assert!(matches!(bare.pick_connection("svc"), Err(transport::Error::NoLiveConnection(_))));
}

// ============================================================================
//  CONTEXT, REPLIES, ERRORS
// ============================================================================

#[tokio::test]
async fn test_context_is_task_scoped() {
    assert!(context::current().is_none());
    let ctx = CallContext::with_tags(MessageTags::new().with("tenant", "acme"));
    let seen = context::scope(ctx.clone(), async {
        let current = context::current().unwrap();
        current.merge_inbound(&MessageTags::new().with("region", "eu"));
        current.outbound_tags().get("tenant").map(str::to_string)
    })
    .await;
    assert_eq!(seen.as_deref(), Some("acme"));
    assert_eq!(ctx.inbound_tags().get("region"), Some("eu"));
    assert!(context::current().is_none());
}

#[tokio::test]
async fn test_reply_adapters() {
    let reply = Reply::ready(Some(Value::from(7)));
    assert_eq!(reply.shape(), ReplyShape::Single);
    assert_eq!(reply.value::<i64>().await.unwrap(), Some(7));

    let reply = Reply::ready(None);
    match reply.into_stream().err() {
        Some(Error::ReplyShape { expected: ReplyShape::Many, found: ReplyShape::Single }) => {}
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_error_classification() {
    assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
    assert!(Error::from(transport::Error::ConnectionLost("x".into())).is_retryable());
    assert!(!Error::from(transport::Error::Remote { code: 0x201, message: "boom".into() }).is_retryable());
    assert_eq!(Error::UnsupportedEncoding("x".into()).kind(), ErrorKind::Protocol);
    assert_eq!(
        Error::from(metadata::Error::NotCacheable { method: "m".into() }).kind(),
        ErrorKind::Configuration
    );
}
