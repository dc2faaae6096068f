use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gantry::config::{AppConfig, TranslatorConfig};
use gantry::ir::{
    BackendObjectIr, BackendRefIr, EndpointWithMd, EndpointsForBackend, FilterChainCommon,
    GatewayIr, HttpBackend, HttpFilterChainIr, HttpRouteIr, HttpRouteRuleMatchIr, ListenerIr,
    Locality, ObjectSource, RouteMatcher, UniquelyConnectedClient, VirtualHostIr,
};
use gantry::syncer::{LoggingStatusWriter, ProxySyncer};
use gantry::xds::{gateway_role, GatewayTranslator, PluginRegistry, ReportMap};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn gateway_source() -> ObjectSource {
    ObjectSource::new("gateway.networking.k8s.io", "Gateway", "default", "edge")
}

fn backends(count: usize) -> Vec<BackendObjectIr> {
    (0..count)
        .map(|i| BackendObjectIr::new(ObjectSource::new("", "Service", "default", format!("svc-{}", i)), 8080))
        .collect()
}

/// One virtual host per backend, each with a single prefix rule.
fn gateway(backends: &[BackendObjectIr]) -> GatewayIr {
    let mut chain = HttpFilterChainIr::new(FilterChainCommon::named("http"));
    for (i, backend) in backends.iter().enumerate() {
        let route = Arc::new(HttpRouteIr::new(ObjectSource::new(
            "gateway.networking.k8s.io",
            "HTTPRoute",
            "default",
            format!("route-{}", i),
        )));
        let mut rule = HttpRouteRuleMatchIr::new(route, RouteMatcher::prefix("/"));
        rule.backends.push(HttpBackend::new(BackendRefIr::to_backend(Arc::new(backend.clone()), 1)));
        chain.virtual_hosts.push(VirtualHostIr {
            name: format!("vhost-{}", i),
            hostname: format!("svc-{}.example.com", i),
            rules: vec![rule],
        });
    }
    let mut listener = ListenerIr::new("http", "0.0.0.0", 8080);
    listener.http_filter_chains.push(chain);
    let mut gateway = GatewayIr::new(gateway_source());
    gateway.listeners.push(listener);
    gateway
}

fn client(zone: &str) -> UniquelyConnectedClient {
    UniquelyConnectedClient::new(
        gateway_role(&gateway_source()),
        "default",
        BTreeMap::new(),
        Locality::new("us-east", zone, ""),
    )
}

fn bench_translate_gateway(c: &mut Criterion) {
    let mut group = c.benchmark_group("gateway_translation");
    group.measurement_time(Duration::from_secs(10));

    let translator =
        GatewayTranslator::new(Arc::new(PluginRegistry::with_builtins()), TranslatorConfig::default());

    for count in [10, 100, 500].iter() {
        let gw = gateway(&backends(*count));
        group.bench_with_input(BenchmarkId::new("virtual_hosts", count), count, |b, &_count| {
            b.iter(|| {
                let mut reports = ReportMap::new();
                black_box(translator.translate_gateway(black_box(&gw), &mut reports))
            });
        });
    }

    group.finish();
}

fn bench_client_connect(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("client_snapshot");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(50);

    for count in [10, 100].iter() {
        let syncer = ProxySyncer::new(
            Arc::new(PluginRegistry::with_builtins()),
            &AppConfig::default(),
            Arc::new(LoggingStatusWriter),
        );
        let backends = backends(*count);
        rt.block_on(async {
            syncer.upsert_gateway(gateway(&backends)).await;
            for backend in &backends {
                syncer.upsert_backend(backend.clone()).await;
                let mut eps = EndpointsForBackend::new(backend);
                eps.add(Locality::new("us-east", "1a", ""), EndpointWithMd::new("10.0.0.1", 8080));
                eps.add(Locality::new("us-east", "1b", ""), EndpointWithMd::new("10.0.1.1", 8080));
                syncer.upsert_endpoints(eps).await;
            }
        });

        group.bench_with_input(BenchmarkId::new("connect_disconnect", count), count, |b, &_count| {
            b.to_async(&rt).iter(|| async {
                let client = client("1a");
                let key = client.resource_name().to_string();
                let changed = syncer.client_connected(client).await;
                syncer.client_disconnected(&key).await;
                black_box(changed)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_translate_gateway, bench_client_connect);
criterion_main!(benches);
