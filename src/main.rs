//! Call admission engine driver.
//!
//! Builds a server from configuration over in-memory completion queues and
//! drives a synthetic workload through it: application threads keep one
//! request outstanding per method on their queue while transport threads
//! deliver loopback streams. Stops when the workload is done or on Ctrl-C,
//! then shuts the server down and prints a summary.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;

use call_admission::completion_queue::{EventQueue, PollResult, QueueHandle, Tag};
use call_admission::config::loader::load_config;
use call_admission::config::ServerConfig;
use call_admission::lifecycle::signals::stop_on_ctrl_c;
use call_admission::observability::{logging, metrics};
use call_admission::routing::{MethodHandle, PayloadHandling};
use call_admission::transport::{InitialMetadata, LoopbackStream};
use call_admission::{BatchOutputs, CallError, RegisteredOutputs, Server, ServerBuilder};

const SHUTDOWN_TAG: Tag = Tag(u64::MAX);
const KIND_BITS: u64 = 16;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "call-admission")]
#[command(about = "Drive a synthetic workload through the call admission engine", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application and transport threads (overrides the config).
    #[arg(long)]
    threads: Option<usize>,

    /// Calls delivered per transport thread (overrides the config).
    #[arg(long)]
    calls: Option<usize>,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default)]
struct Stats {
    delivered: AtomicUsize,
    refused: AtomicUsize,
    published: AtomicUsize,
    failed: AtomicUsize,
    next_seq: AtomicU64,
}

#[derive(Debug, Serialize)]
struct Summary {
    completion_queues: usize,
    methods: usize,
    calls_delivered: usize,
    calls_refused: usize,
    calls_published: usize,
    requests_failed: usize,
    pending_at_shutdown: usize,
    elapsed_ms: u128,
    published_per_sec: f64,
}

/// Which bucket a request targets: 0 is unregistered, k is method k-1.
fn encode_tag(stats: &Stats, kind: usize) -> Tag {
    let seq = stats.next_seq.fetch_add(1, Ordering::Relaxed);
    Tag((seq << KIND_BITS) | kind as u64)
}

fn decode_kind(tag: Tag) -> usize {
    (tag.0 & ((1 << KIND_BITS) - 1)) as usize
}

fn issue_request(server: &Server, cq: &QueueHandle, kind: usize, stats: &Stats) -> Result<(), CallError> {
    let tag = encode_tag(stats, kind);
    if kind == 0 {
        return server.request_call(tag, cq.clone(), cq.clone(), BatchOutputs::new());
    }
    let handle = MethodHandle::from_index(kind - 1);
    let outputs = match server.method(handle).map(|m| m.spec.payload) {
        Some(PayloadHandling::ReadInitialMessage) => RegisteredOutputs::with_payload(),
        _ => RegisteredOutputs::new(),
    };
    server.request_registered_call(handle, tag, cq.clone(), cq.clone(), outputs)
}

/// Keep one request per bucket outstanding on `cq` until the queue shuts down.
fn run_app_thread(server: Server, cq: Arc<EventQueue>, stats: Arc<Stats>) {
    let handle: QueueHandle = cq.clone();
    let kinds = server.method_count() + 1;
    for kind in 0..kinds {
        if let Err(e) = issue_request(&server, &handle, kind, &stats) {
            tracing::warn!(queue = %cq.name(), kind, error = %e, "Initial request failed");
        }
    }

    loop {
        match cq.next(POLL_INTERVAL) {
            PollResult::Event(event) if event.tag == SHUTDOWN_TAG => {
                tracing::info!(queue = %cq.name(), "Shutdown tag delivered");
            }
            PollResult::Event(event) => match event.result {
                Ok(()) => {
                    stats.published.fetch_add(1, Ordering::Relaxed);
                    let kind = decode_kind(event.tag);
                    if let Err(e) = issue_request(&server, &handle, kind, &stats) {
                        tracing::debug!(queue = %cq.name(), error = %e, "Request not reissued");
                    }
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(queue = %cq.name(), tag = %event.tag, error = %e, "Request failed");
                }
            },
            PollResult::Timeout => {}
            PollResult::Shutdown => break,
        }
    }
}

fn run_transport_thread(
    server: Server,
    accepting: QueueHandle,
    calls: usize,
    unregistered_ratio: f64,
    stop: Arc<AtomicBool>,
    stats: Arc<Stats>,
) {
    let channel = server.setup_transport(Some(&accepting));
    let methods = server.method_count();

    for _ in 0..calls {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let pick_unregistered = methods == 0 || fastrand::f64() < unregistered_ratio;
        let stream = if pick_unregistered {
            LoopbackStream::new(InitialMetadata::new("/driver.Unregistered/Call", "localhost"))
        } else {
            let handle = MethodHandle::from_index(fastrand::usize(..methods));
            let Some(method) = server.method(handle) else {
                continue;
            };
            let host = method.spec.host.clone().unwrap_or_else(|| "localhost".to_string());
            let mut md = InitialMetadata::new(method.spec.name.clone(), host);
            if method.spec.flags.is_idempotent_only() {
                md = md.idempotent();
            }
            let stream = LoopbackStream::new(md);
            match method.spec.payload {
                PayloadHandling::ReadInitialMessage => stream.with_message(b"driver-payload".to_vec()),
                PayloadHandling::None => stream,
            }
        };

        match channel.accept_stream(Arc::new(stream)) {
            Ok(_) => stats.delivered.fetch_add(1, Ordering::Relaxed),
            Err(_) => stats.refused.fetch_add(1, Ordering::Relaxed),
        };
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.simulation.app_threads = threads;
        config.simulation.transport_threads = threads;
    }
    if let Some(calls) = cli.calls {
        config.simulation.calls_per_thread = calls;
    }

    logging::init(&config.observability.log_level);
    tracing::info!("call-admission v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let queues: Vec<Arc<EventQueue>> = (0..config.completion_queues)
        .map(|i| Arc::new(EventQueue::new(format!("cq{i}"))))
        .collect();
    let handles: Vec<QueueHandle> = queues.iter().map(|q| q.clone() as QueueHandle).collect();
    let server = ServerBuilder::from_config(&config, &handles)?.start()?;

    tracing::info!(
        completion_queues = handles.len(),
        methods = server.method_count(),
        app_threads = config.simulation.app_threads,
        transport_threads = config.simulation.transport_threads,
        calls_per_thread = config.simulation.calls_per_thread,
        "Configuration loaded"
    );

    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn(stop_on_ctrl_c(stop.clone()));
    let stats = Arc::new(Stats::default());
    let started = Instant::now();

    let app_threads: Vec<_> = (0..config.simulation.app_threads.max(1))
        .map(|i| {
            let server = server.clone();
            let cq = queues[i % queues.len()].clone();
            let stats = stats.clone();
            tokio::task::spawn_blocking(move || run_app_thread(server, cq, stats))
        })
        .collect();

    let transports: Vec<_> = (0..config.simulation.transport_threads)
        .map(|i| {
            let server = server.clone();
            let accepting = handles[i % handles.len()].clone();
            let calls = config.simulation.calls_per_thread;
            let ratio = config.simulation.unregistered_ratio;
            let stop = stop.clone();
            let stats = stats.clone();
            tokio::task::spawn_blocking(move || {
                run_transport_thread(server, accepting, calls, ratio, stop, stats)
            })
        })
        .collect();
    for transport in transports {
        transport.await?;
    }

    let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
    while !stop.load(Ordering::Relaxed)
        && stats.published.load(Ordering::Relaxed) < stats.delivered.load(Ordering::Relaxed)
        && Instant::now() < drain_deadline
    {
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let pending_at_shutdown = server.pending_calls();
    server.shutdown_and_notify(&handles[0], SHUTDOWN_TAG);
    while !server.is_shutdown_published() && Instant::now() < drain_deadline + DRAIN_TIMEOUT {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    for queue in &queues {
        queue.shutdown();
    }
    for app in app_threads {
        app.await?;
    }

    let elapsed = started.elapsed();
    let published = stats.published.load(Ordering::Relaxed);
    let summary = Summary {
        completion_queues: handles.len(),
        methods: server.method_count(),
        calls_delivered: stats.delivered.load(Ordering::Relaxed),
        calls_refused: stats.refused.load(Ordering::Relaxed),
        calls_published: published,
        requests_failed: stats.failed.load(Ordering::Relaxed),
        pending_at_shutdown,
        elapsed_ms: elapsed.as_millis(),
        published_per_sec: published as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Completion queues:   {}", summary.completion_queues);
        println!("Registered methods:  {}", summary.methods);
        println!("Calls delivered:     {}", summary.calls_delivered);
        println!("Calls refused:       {}", summary.calls_refused);
        println!("Calls published:     {}", summary.calls_published);
        println!("Requests failed:     {}", summary.requests_failed);
        println!("Pending at shutdown: {}", summary.pending_at_shutdown);
        println!("Elapsed:             {} ms", summary.elapsed_ms);
        println!("Throughput:          {:.0} calls/s", summary.published_per_sec);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
