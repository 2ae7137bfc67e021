//! SENTINEL entrypoint: wires the ingestors, the flow/window engine, the
//! detectors, the policy orchestrator, and the publisher into one process,
//! then serves the operator HTTP surface (spec §5, §6).
//!
//! Usage:
//!   sentinel --config sentinel.toml
//!
//! Environment variables:
//!   SENTINEL_CONFIG_PATH   - path to the TOML config file
//!   SENTINEL_HTTP_BIND     - override the HTTP bind address
//!   SENTINEL_NETFLOW_PORT  - override the NetFlow UDP port
//!   SENTINEL_SFLOW_PORT    - override the sFlow UDP port
//!   SENTINEL_API_AUTH_TOKEN - bearer token required on protected routes

mod api;

use clap::Parser;
use sentinel_core::adapters::aws::AwsAdapter;
use sentinel_core::adapters::azure::AzureAdapter;
use sentinel_core::adapters::gcp::GcpAdapter;
use sentinel_core::adapters::iptables::IptablesAdapter;
use sentinel_core::adapters::nftables::NftablesAdapter;
use sentinel_core::adapters::{self, FirewallAdapter};
use sentinel_core::cim::RawEvent;
use sentinel_core::config::{self, AdapterKind, Config};
use sentinel_core::detectors::{self, DetectorEngine};
use sentinel_core::error;
use sentinel_core::flow::{self, StreamProcessor};
use sentinel_core::ingest::{self, netflow, pcap as pcap_ingest, sflow, DropOldestSender, IngestCounters};
use sentinel_core::middleware;
use sentinel_core::normalize;
use sentinel_core::policy::{self, InMemoryPolicyStore, PolicyOrchestrator};
use sentinel_core::publish::{self, publish_record, DurableLog, HotStats, InMemoryDurableLog, Topic};
use sentinel_core::shutdown;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Autonomous network threat detection and response: ingest, detect, and enforce")]
struct Args {
    /// Path to a TOML configuration file; falls back to defaults + env overrides.
    #[arg(short, long, env = "SENTINEL_CONFIG_PATH")]
    config: Option<PathBuf>,
}

fn now_ns() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "sentinel_core=info,sentinel=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Builds the vendor adapter registry. Cloud adapters are always
/// constructed (no SDK dependency to fail on) so `/health` can report their
/// honest `is_available() == false`; they only accept rules once the
/// matching config section is present, per the orchestrator's per-vendor
/// `target_vendors` selection.
fn build_adapters(cfg: &Config) -> HashMap<String, Arc<dyn FirewallAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn FirewallAdapter>> = HashMap::new();

    let want_vendor = |kind: AdapterKind| cfg.adapter.kind == AdapterKind::Auto || cfg.adapter.kind == kind;

    if want_vendor(AdapterKind::Iptables) {
        adapters.insert("iptables".to_string(), Arc::new(IptablesAdapter::new()));
    }
    if want_vendor(AdapterKind::Nftables) {
        adapters.insert("nftables".to_string(), Arc::new(NftablesAdapter::new()));
    }
    if let Some(aws) = &cfg.adapter.aws {
        adapters.insert("aws".to_string(), Arc::new(AwsAdapter::new(aws.security_group_id.clone())));
    }
    if cfg.adapter.azure.is_some() {
        adapters.insert("azure".to_string(), Arc::new(AzureAdapter::new()));
    }
    if cfg.adapter.gcp.is_some() {
        adapters.insert("gcp".to_string(), Arc::new(GcpAdapter::new()));
    }

    adapters
}

/// Normalizes one raw event, admits it into the flow engine, updates hot
/// stats, runs the inline detectors, and publishes the results. Shared by
/// every background ingestor task (the push API route handles its own copy
/// of this pipeline since it needs to report per-record errors back to an
/// HTTP caller, which a background task has no one to report to).
fn process_raw_event(
    raw: RawEvent,
    source_key: &str,
    is_flow_record_source: bool,
    counters: &IngestCounters,
    processor: &StreamProcessor,
    detectors: &DetectorEngine,
    stats: &HotStats,
    log: &dyn DurableLog,
) {
    let cim = match normalize::normalize(&raw) {
        Ok(c) => c,
        Err(e) => {
            counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            debug!(source = source_key, error = %e, "dropping record that failed normalization");
            return;
        }
    };

    processor.admit(source_key, &cim, is_flow_record_source);
    stats.observe(&cim, now_ns());
    let _ = publish_record(log, Topic::NormalizedTraffic, &cim);

    for anomaly in detectors.on_event(&cim) {
        stats.record_alert(&anomaly);
        let _ = publish_record(log, Topic::Anomalies, &anomaly);
    }
}

/// Drains one ingestor's queue until cancelled, running every record
/// through [`process_raw_event`] (spec §4.1 "ingestors hand off to the
/// normalizer over a bounded queue").
async fn run_normalizer(
    source_key: &'static str,
    is_flow_record_source: bool,
    mut rx: mpsc::Receiver<RawEvent>,
    counters: Arc<IngestCounters>,
    processor: Arc<StreamProcessor>,
    detectors: Arc<DetectorEngine>,
    stats: Arc<HotStats>,
    log: Arc<dyn DurableLog>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_raw = rx.recv() => {
                match maybe_raw {
                    Some(raw) => process_raw_event(
                        raw,
                        source_key,
                        is_flow_record_source,
                        &counters,
                        &processor,
                        &detectors,
                        &stats,
                        log.as_ref(),
                    ),
                    None => break,
                }
            }
        }
    }
    info!(source = source_key, "normalizer task exiting");
}

/// NetFlow v5/v9 UDP listener (spec §4.1). Version is read from the
/// datagram itself; a single `TemplateCache` is shared across exporters
/// since it's already keyed by `(exporter, source_id, template_id)`.
async fn run_netflow_listener(port: u16, sender: DropOldestSender, cancel: CancellationToken) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    info!(port, "netflow listener bound");
    let mut buf = [0u8; 65535];
    let mut cache = netflow::TemplateCache::new();

    loop {
        let (n, peer) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            recv = socket.recv_from(&mut buf) => recv?,
        };
        if n < 2 {
            continue;
        }
        let arrival = now_ns();
        let version = u16::from_be_bytes([buf[0], buf[1]]);
        let decoded = match version {
            5 => netflow::decode_v5(&buf[..n], peer.ip(), arrival).map(|events| (events, 0)),
            9 => netflow::decode_v9(&buf[..n], peer.ip(), arrival, &mut cache),
            other => Err(error::IngestError::UnsupportedVersion(other)),
        };
        match decoded {
            Ok((events, dropped)) => {
                for event in events {
                    sender.offer(event);
                }
                if dropped > 0 {
                    warn!(exporter = %peer.ip(), dropped, "netflow v9 records dropped for unknown template");
                }
            }
            Err(e) => debug!(exporter = %peer.ip(), error = %e, "malformed netflow datagram"),
        }
    }
}

/// sFlow v5 UDP listener (spec §4.1).
async fn run_sflow_listener(port: u16, sender: DropOldestSender, cancel: CancellationToken) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    info!(port, "sflow listener bound");
    let mut buf = [0u8; 65535];

    loop {
        let (n, peer) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            recv = socket.recv_from(&mut buf) => recv?,
        };
        let arrival = now_ns();
        match sflow::decode_v5(&buf[..n], peer.ip(), arrival) {
            Ok(events) => {
                for event in events {
                    sender.offer(event);
                }
            }
            Err(e) => debug!(exporter = %peer.ip(), error = %e, "malformed sflow datagram"),
        }
    }
}

/// Raw packet capture on one interface (spec §4.1 "a chosen interface or
/// `any`"). `pcap::Capture` is a blocking API, so the read loop runs on a
/// blocking thread with a short capture timeout, polling `cancel` between
/// reads rather than blocking shutdown indefinitely on an idle interface.
fn run_pcap_capture(interface: String, sender: DropOldestSender, cancel: CancellationToken) -> anyhow::Result<()> {
    let device = if interface == "any" {
        pcap::Device::lookup()?.ok_or_else(|| anyhow::anyhow!("no default pcap device available"))?
    } else {
        pcap::Device::list()?
            .into_iter()
            .find(|d| d.name == interface)
            .ok_or_else(|| anyhow::anyhow!("pcap interface '{interface}' not found"))?
    };

    let mut capture = pcap::Capture::from_device(device)?
        .promisc(true)
        .snaplen(65535)
        .timeout(1000)
        .open()?;

    info!(interface = %interface, "pcap capture started");
    while !cancel.is_cancelled() {
        match capture.next_packet() {
            Ok(packet) => {
                let arrival = now_ns();
                match pcap_ingest::decode_frame(packet.data, arrival) {
                    Ok(event) => sender.offer(event),
                    Err(e) => debug!(interface = %interface, error = %e, "malformed frame"),
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                warn!(interface = %interface, error = %e, "pcap capture error, stopping interface");
                break;
            }
        }
    }
    info!(interface = %interface, "pcap capture stopped");
    Ok(())
}

/// Periodically sweeps every closed (flow, window), extracts features,
/// publishes them, and runs the window-close detectors (spec §4.3 step 4,
/// §4.4 "and at each window close").
async fn run_window_sweep(
    source_keys: Vec<&'static str>,
    processor: Arc<StreamProcessor>,
    detectors: Arc<DetectorEngine>,
    stats: Arc<HotStats>,
    log: Arc<dyn DurableLog>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for source_key in &source_keys {
                    let is_flow_record_source = *source_key == "netflow" || *source_key == "sflow";
                    for closed in processor.sweep_closed(source_key, is_flow_record_source) {
                        let features = flow::compute_feature_vector(&closed.aggregate);
                        let payload = serde_json::json!({
                            "src_ip": closed.key.src_ip.to_string(),
                            "dest_ip": closed.key.dest_ip.to_string(),
                            "src_port": closed.key.src_port,
                            "dest_port": closed.key.dest_port,
                            "transport": closed.key.transport.as_str(),
                            "window_start_ns": closed.window.start_ns,
                            "window_end_ns": closed.window.end_ns,
                            "features": features,
                        });
                        if log.publish(Topic::ExtractedFeatures, payload).is_err() {
                            warn!(source = source_key, "failed to publish extracted features");
                        }

                        for anomaly in detectors.on_window_close(&closed.key, &closed.window, &closed.aggregate) {
                            stats.record_alert(&anomaly);
                            let _ = publish_record(log.as_ref(), Topic::Anomalies, &anomaly);
                        }
                    }
                }
            }
        }
    }
    info!("window sweep task exiting");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let config = Arc::new(config);
    info!(http_bind = %config.http_bind, netflow_port = config.netflow_port, sflow_port = config.sflow_port, "starting sentinel");

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))?;

    let processor = Arc::new(StreamProcessor::new((*config).clone()));
    let detectors = Arc::new(DetectorEngine::new(config.thresholds.clone()));
    let stats = Arc::new(HotStats::new());
    let log: Arc<dyn DurableLog> = Arc::new(InMemoryDurableLog::new());

    let adapters = build_adapters(&config);
    let store = Arc::new(InMemoryPolicyStore::new());
    let orchestrator = Arc::new(PolicyOrchestrator::new(store.clone(), adapters.clone()));

    let cancel = CancellationToken::new();

    let mut ingest_counters: HashMap<&'static str, Arc<IngestCounters>> = HashMap::new();
    ingest_counters.insert("netflow", Arc::new(IngestCounters::default()));
    ingest_counters.insert("sflow", Arc::new(IngestCounters::default()));
    ingest_counters.insert("pcap", Arc::new(IngestCounters::default()));
    ingest_counters.insert("api", Arc::new(IngestCounters::default()));

    let mut join_handles = Vec::new();

    {
        let (tx, rx) = ingest::channel(config.ingest_queue_capacity);
        let counters = ingest_counters["netflow"].clone();
        let sender = DropOldestSender::new(tx, "netflow", counters.clone());
        join_handles.push(tokio::spawn(run_normalizer(
            "netflow",
            true,
            rx,
            counters,
            processor.clone(),
            detectors.clone(),
            stats.clone(),
            log.clone(),
            cancel.clone(),
        )));
        let port = config.netflow_port;
        let listener_cancel = cancel.clone();
        join_handles.push(tokio::spawn(async move {
            if let Err(e) = run_netflow_listener(port, sender, listener_cancel).await {
                error!(error = %e, "netflow listener exited with error");
            }
        }));
    }

    {
        let (tx, rx) = ingest::channel(config.ingest_queue_capacity);
        let counters = ingest_counters["sflow"].clone();
        let sender = DropOldestSender::new(tx, "sflow", counters.clone());
        join_handles.push(tokio::spawn(run_normalizer(
            "sflow",
            true,
            rx,
            counters,
            processor.clone(),
            detectors.clone(),
            stats.clone(),
            log.clone(),
            cancel.clone(),
        )));
        let port = config.sflow_port;
        let listener_cancel = cancel.clone();
        join_handles.push(tokio::spawn(async move {
            if let Err(e) = run_sflow_listener(port, sender, listener_cancel).await {
                error!(error = %e, "sflow listener exited with error");
            }
        }));
    }

    {
        let (tx, rx) = ingest::channel(config.ingest_queue_capacity);
        let counters = ingest_counters["pcap"].clone();
        join_handles.push(tokio::spawn(run_normalizer(
            "pcap",
            false,
            rx,
            counters.clone(),
            processor.clone(),
            detectors.clone(),
            stats.clone(),
            log.clone(),
            cancel.clone(),
        )));
        for interface in config.pcap_interfaces.clone() {
            let sender = DropOldestSender::new(tx.clone(), "pcap", counters.clone());
            let capture_cancel = cancel.clone();
            join_handles.push(tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || run_pcap_capture(interface, sender, capture_cancel)).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "pcap capture task failed"),
                    Err(e) => warn!(error = %e, "pcap capture task panicked"),
                }
            }));
        }
    }

    join_handles.push(tokio::spawn(run_window_sweep(
        vec!["netflow", "sflow", "pcap", "api"],
        processor.clone(),
        detectors.clone(),
        stats.clone(),
        log.clone(),
        cancel.clone(),
    )));

    join_handles.push(tokio::spawn(policy::reaper::run(store.clone(), adapters.clone(), cancel.clone(), now_ns)));

    let shutdown_cancel = cancel.clone();
    let shutdown_task = tokio::spawn(shutdown::run(shutdown_cancel));

    let app_state = api::AppState {
        config: config.clone(),
        processor: processor.clone(),
        detectors: detectors.clone(),
        orchestrator,
        stats: stats.clone(),
        log: log.clone(),
        adapters: Arc::new(adapters),
        ingest_counters: Arc::new(ingest_counters),
        started_at_ns: now_ns(),
    };

    let (router, rate_limiter) = api::build_router(app_state);
    let app = router.route(
        "/metrics",
        axum::routing::get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );

    let cleanup_cancel = cancel.clone();
    join_handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = cleanup_cancel.cancelled() => break,
                _ = ticker.tick() => rate_limiter.cleanup(),
            }
        }
    }));

    let addr: SocketAddr = config.http_bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "operator API listening");

    let server_cancel = cancel.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await?;

    shutdown_task.await.ok();
    shutdown::drain_with_grace("pipeline", async move {
        for handle in join_handles {
            let _ = handle.await;
        }
    })
    .await;

    info!("sentinel shut down cleanly");
    Ok(())
}
