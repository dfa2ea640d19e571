// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Network path collector.
//!
//! Connections are turned into pathtests by [`NpCollector::schedule_conns`]
//! and offered to a bounded input channel. A listener task moves them into
//! the [`PathtestStore`], the flush loop hands due pathtests to the
//! processing channel, and a pool of workers runs the traceroutes, enriches
//! them and forwards the resulting events.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use dd_agent_log::LogLimit;
use dd_agent_telemetry::Telemetry;
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::CollectorConfig;
use crate::connection::{Connection, ConnectionDirection, ConnectionFamily, DnsMap};
use crate::errors::Error;
use crate::filter::{
    Cidr, ConnectionFilter, FilterableConnection, is_excluded_connection,
    parse_connection_filters, subnets_contain,
};
use crate::forwarder::{EventType, Forwarder};
use crate::metrics;
use crate::pathtest::Pathtest;
use crate::payload::{NetworkPath, PathOrigin};
use crate::rdns::{ReverseDnsQuerier, enrich_path};
use crate::store::{PathtestContext, PathtestStore};
use crate::subnets::SubnetProvider;
use crate::traceroute::{Traceroute, TracerouteConfig};

const VPC_SUBNETS_TIMEOUT: Duration = Duration::from_secs(2);
const INPUT_FULL_LOG_BURST: u32 = 10;
const INPUT_FULL_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Capabilities the collector runs against.
#[derive(Clone)]
pub struct Dependencies {
    pub traceroute: Arc<dyn Traceroute>,
    pub rdns: Arc<dyn ReverseDnsQuerier>,
    pub forwarder: Arc<dyn Forwarder>,
    pub subnets: Arc<dyn SubnetProvider>,
    pub telemetry: Telemetry,
}

struct Inner {
    config: CollectorConfig,
    source_excludes: Vec<ConnectionFilter>,
    dest_excludes: Vec<ConnectionFilter>,
    deps: Dependencies,
    store: PathtestStore,

    input_tx: mpsc::Sender<Pathtest>,
    input_rx: tokio::sync::Mutex<mpsc::Receiver<Pathtest>>,
    processing_tx: mpsc::Sender<PathtestContext>,
    processing_rx: tokio::sync::Mutex<mpsc::Receiver<PathtestContext>>,

    vpc_subnets: RwLock<Vec<Cidr>>,
    input_full_log: LogLimit,

    received_pathtests: AtomicU64,
    processed_traceroutes: AtomicU64,
}

struct Running {
    stop: watch::Sender<bool>,
    listener: JoinHandle<()>,
    flush_loop: JoinHandle<()>,
    workers: JoinHandle<()>,
}

pub struct NpCollector {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

fn store_subnets(slot: &RwLock<Vec<Cidr>>, subnets: Vec<Cidr>) {
    *slot.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = subnets;
}

fn load_subnets(slot: &RwLock<Vec<Cidr>>) -> Vec<Cidr> {
    slot.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn queued<T>(sender: &mpsc::Sender<T>) -> usize {
    sender.max_capacity().saturating_sub(sender.capacity())
}

impl NpCollector {
    pub fn new(config: CollectorConfig, deps: Dependencies) -> Self {
        info!(
            "new network path collector: workers={} input_chan_size={} processing_chan_size={} flush_interval={}s",
            config.workers, config.input_chan_size, config.processing_chan_size, config.flush_interval
        );
        let (input_tx, input_rx) = mpsc::channel(config.input_chan_size.max(1));
        let (processing_tx, processing_rx) = mpsc::channel(config.processing_chan_size.max(1));
        let inner = Inner {
            source_excludes: parse_connection_filters(&config.source_excludes),
            dest_excludes: parse_connection_filters(&config.dest_excludes),
            store: PathtestStore::new(config.store_config(), deps.telemetry.clone()),
            config,
            deps,
            input_tx,
            input_rx: tokio::sync::Mutex::new(input_rx),
            processing_tx,
            processing_rx: tokio::sync::Mutex::new(processing_rx),
            vpc_subnets: RwLock::new(Vec::new()),
            input_full_log: LogLimit::new(INPUT_FULL_LOG_BURST, INPUT_FULL_LOG_INTERVAL),
            received_pathtests: AtomicU64::new(0),
            processed_traceroutes: AtomicU64::new(0),
        };
        Self {
            inner: Arc::new(inner),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Turn `conns` into pathtests and offer them to the input channel.
    /// Never blocks: pathtests that do not fit are dropped and counted.
    pub fn schedule_conns(&self, conns: &[Connection], dns: &DnsMap) {
        self.inner.schedule_conns(conns, dns);
    }

    /// Fetch the VPC subnets, then start the listener, the flush loop and
    /// the workers.
    pub async fn start(&self) -> Result<(), Error> {
        if self.running().is_some() {
            return Err(Error::AlreadyStarted);
        }
        info!("start network path collector");
        self.inner.refresh_vpc_subnets().await;

        let (stop, stop_rx) = watch::channel(false);
        let listener = tokio::spawn(listen_pathtests(self.inner.clone(), stop_rx.clone()));
        let flush_loop = tokio::spawn(flush_loop(self.inner.clone(), stop_rx.clone()));
        let workers = tokio::spawn(run_workers(self.inner.clone(), stop_rx));

        let mut running = self.running();
        if running.is_some() {
            listener.abort();
            flush_loop.abort();
            workers.abort();
            return Err(Error::AlreadyStarted);
        }
        *running = Some(Running {
            stop,
            listener,
            flush_loop,
            workers,
        });
        Ok(())
    }

    /// Signal every task to stop and wait for all of them. Safe to call
    /// twice or without a successful start.
    pub async fn stop(&self) {
        info!("stop network path collector");
        let Some(running) = self.running().take() else {
            return;
        };
        let _ = running.stop.send(true);
        for (name, handle) in [
            ("flush loop", running.flush_loop),
            ("workers", running.workers),
            ("pathtest listener", running.listener),
        ] {
            if let Err(e) = handle.await {
                warn!("network path collector {name} ended abnormally: {e}");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Run one flush immediately.
    pub fn flush(&self) {
        self.inner.flush();
    }

    pub fn store_len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn received_pathtest_count(&self) -> u64 {
        self.inner.received_pathtests.load(Ordering::Relaxed)
    }

    pub fn processed_traceroute_count(&self) -> u64 {
        self.inner.processed_traceroutes.load(Ordering::Relaxed)
    }
}

impl Inner {
    fn telemetry(&self) -> &Telemetry {
        &self.deps.telemetry
    }

    fn count(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        self.telemetry().count(&metrics::name(name), value, labels);
    }

    fn gauge(&self, name: &str, value: f64) {
        self.telemetry().gauge(&metrics::name(name), value, &[]);
    }

    fn histogram(&self, name: &str, value: f64) {
        self.telemetry().histogram(&metrics::name(name), value, &[]);
    }

    fn skip(&self, reason: &str) -> bool {
        self.count(metrics::CONNS_SKIPPED, 1, &[("reason", reason)]);
        false
    }

    async fn refresh_vpc_subnets(&self) {
        if !self.config.disable_intra_vpc_collection {
            return;
        }
        let subnets = match tokio::time::timeout(
            VPC_SUBNETS_TIMEOUT,
            self.deps.subnets.vpc_subnets(),
        )
        .await
        {
            Ok(Ok(subnets)) => subnets,
            Ok(Err(e)) => {
                error!("disable_intra_vpc_collection is enforced, but failed to get VPC subnets: {e}");
                Vec::new()
            }
            Err(_) => {
                error!(
                    "disable_intra_vpc_collection is enforced, but fetching VPC subnets timed out after {VPC_SUBNETS_TIMEOUT:?}"
                );
                Vec::new()
            }
        };
        debug!("skipping traffic to {} VPC subnets", subnets.len());
        store_subnets(&self.vpc_subnets, subnets);
    }

    fn vpc_subnets(&self) -> Vec<Cidr> {
        load_subnets(&self.vpc_subnets)
    }

    fn schedule_conns(&self, conns: &[Connection], dns: &DnsMap) {
        if !self.config.connections_monitoring_enabled {
            return;
        }
        let start = Instant::now();
        let subnets = self.vpc_subnets();
        self.count(metrics::CONNS_RECEIVED, conns.len() as u64, &[]);
        for conn in conns {
            if !self.should_schedule(conn, &subnets) {
                trace!(
                    "skipped connection: addr={}:{}, protocol={}",
                    conn.raddr.ip,
                    conn.raddr.port,
                    conn.conn_type.protocol()
                );
                continue;
            }
            self.schedule_one(Pathtest::from_connection(conn, dns));
        }
        self.gauge(metrics::SCHEDULE_DURATION, start.elapsed().as_secs_f64());
    }

    fn should_schedule(&self, conn: &Connection, subnets: &[Cidr]) -> bool {
        if conn.intra_host {
            return self.skip("skip_intra_host");
        }
        if conn.direction != ConnectionDirection::Outgoing {
            return self.skip("skip_incoming");
        }
        // only IPv4 is supported
        if conn.family != ConnectionFamily::V4 {
            return self.skip("skip_ipv6");
        }
        self.passes_cidr_filters(conn, subnets)
    }

    fn passes_cidr_filters(&self, conn: &Connection, subnets: &[Cidr]) -> bool {
        if subnets.is_empty() && self.source_excludes.is_empty() && self.dest_excludes.is_empty() {
            return true;
        }

        let Ok(source_ip) = conn.laddr.ip.parse::<IpAddr>() else {
            return self.skip("failed_parse_source_ip");
        };
        let Ok(dest_ip) = conn.translated_dest_ip().parse::<IpAddr>() else {
            return self.skip("failed_parse_dest_ip");
        };
        let source = SocketAddr::new(source_ip, u16::try_from(conn.laddr.port).unwrap_or(0));
        let dest = SocketAddr::new(dest_ip, u16::try_from(conn.raddr.port).unwrap_or(0));

        if subnets_contain(subnets, &dest_ip) {
            return self.skip("skip_intra_vpc");
        }
        let filterable = FilterableConnection {
            conn_type: conn.conn_type,
            source,
            dest,
        };
        if is_excluded_connection(&self.source_excludes, &self.dest_excludes, &filterable) {
            return self.skip("skip_cidr_excluded");
        }
        true
    }

    fn schedule_one(&self, pathtest: Pathtest) {
        debug!(
            "schedule traceroute for: hostname={} port={}",
            pathtest.hostname, pathtest.port
        );
        self.count(metrics::SCHEDULE_PATHTEST_COUNT, 1, &[]);
        match self.input_tx.try_send(pathtest) {
            Ok(()) => self.count(metrics::SCHEDULE_PATHTEST_PROCESSED, 1, &[]),
            Err(TrySendError::Full(_)) => {
                self.count(
                    metrics::SCHEDULE_PATHTEST_DROPPED,
                    1,
                    &[("reason", "input_chan_full")],
                );
                if self.input_full_log.should_log() {
                    warn!(
                        "collector input channel is full (channel capacity is {})",
                        self.input_tx.max_capacity()
                    );
                }
            }
            Err(TrySendError::Closed(_)) => error!("collector input channel is closed"),
        }
    }

    fn flush(&self) {
        self.gauge(metrics::WORKERS, self.config.workers as f64);

        let due = self.store.flush(Instant::now());
        let contexts = self.store.len();
        self.gauge(metrics::STORE_SIZE, contexts as f64);
        debug!(
            "flushing {} pathtests to the workers (pathtest contexts: {contexts})",
            due.len()
        );

        self.count(metrics::FLUSH_PATHTEST_COUNT, due.len() as u64, &[]);
        for context in due {
            trace!(
                "flushed pathtest {}:{}",
                context.pathtest.hostname, context.pathtest.port
            );
            match self.processing_tx.try_send(context) {
                Ok(()) => self.count(metrics::FLUSH_PATHTEST_PROCESSED, 1, &[]),
                Err(TrySendError::Full(_)) => {
                    self.count(
                        metrics::FLUSH_PATHTEST_DROPPED,
                        1,
                        &[("reason", "processing_chan_full")],
                    );
                    trace!(
                        "collector processing channel is full (channel capacity is {})",
                        self.processing_tx.max_capacity()
                    );
                }
                Err(TrySendError::Closed(_)) => error!("collector processing channel is closed"),
            }
        }

        // after the pathtests are handed over
        self.gauge(metrics::PROCESSING_CHAN_SIZE, queued(&self.processing_tx) as f64);
        self.gauge(metrics::INPUT_CHAN_SIZE, queued(&self.input_tx) as f64);
    }

    fn traceroute_config(&self, pathtest: &Pathtest) -> TracerouteConfig {
        TracerouteConfig {
            dest_hostname: pathtest.hostname.clone(),
            dest_port: pathtest.port,
            max_ttl: self.config.max_ttl,
            timeout: self.config.timeout(),
            protocol: pathtest.protocol,
            tcp_method: self.config.tcp_method(),
            tcp_syn_paris_traceroute_mode: self.config.tcp_syn_paris_traceroute_mode,
            reverse_dns_hint: pathtest.metadata.reverse_dns_hostname.clone(),
        }
    }

    async fn run_traceroute(&self, config: &TracerouteConfig) -> Result<NetworkPath, Error> {
        match tokio::time::timeout(config.deadline(), self.deps.traceroute.run(config)).await {
            Ok(result) => result,
            Err(_) => Err(Error::TracerouteTimeout(format!(
                "{}:{}",
                config.dest_hostname, config.dest_port
            ))),
        }
    }

    async fn run_traceroute_for_path(&self, context: &PathtestContext) {
        let pathtest = &context.pathtest;
        let config = self.traceroute_config(pathtest);
        let mut path = match self.run_traceroute(&config).await {
            Ok(path) => path,
            Err(e) => {
                error!("{e}");
                return;
            }
        };
        path.source.container_id = pathtest.source_container_id.clone();
        path.namespace = self.config.network_devices_namespace.clone();
        path.origin = PathOrigin::NetworkTraffic;

        if self.config.reverse_dns_enrichment_enabled {
            enrich_path(
                &mut path,
                &pathtest.metadata.reverse_dns_hostname,
                self.deps.rdns.as_ref(),
                self.config.reverse_dns_timeout(),
                self.telemetry(),
            )
            .await;
        }

        let payload = match serde_json::to_vec(&path) {
            Ok(payload) => payload,
            Err(e) => {
                error!("json marshall error: {e}");
                return;
            }
        };
        debug!("network path event: {}", String::from_utf8_lossy(&payload));
        if let Err(e) = self
            .deps
            .forwarder
            .send_blocking(payload, EventType::NetworkPath)
            .await
        {
            error!("{e}");
        }
    }
}

async fn listen_pathtests(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    debug!("starting listening for pathtests");
    let mut input = inner.input_rx.lock().await;
    loop {
        tokio::select! {
            _ = stop.changed() => {
                info!("stopped listening for pathtests");
                return;
            }
            pathtest = input.recv() => {
                let Some(pathtest) = pathtest else {
                    return;
                };
                trace!("pathtest received: {pathtest:?}");
                inner.received_pathtests.fetch_add(1, Ordering::Relaxed);
                inner.store.add(pathtest, Instant::now());
            }
        }
    }
}

async fn flush_loop(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    let period = inner.config.flush_interval();
    debug!("starting flush loop (every {period:?})");
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    let mut last_flush: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = stop.changed() => {
                info!("stopped flush loop");
                return;
            }
            flush_time = ticker.tick() => {
                trace!("flush loop tick");
                if let Some(last) = last_flush {
                    inner.gauge(
                        metrics::FLUSH_INTERVAL,
                        flush_time.saturating_duration_since(last).as_secs_f64(),
                    );
                }
                inner.flush();
                inner.histogram(metrics::FLUSH_DURATION, flush_time.elapsed().as_secs_f64());
                last_flush = Some(flush_time);
            }
        }
    }
}

async fn run_workers(inner: Arc<Inner>, stop: watch::Receiver<bool>) {
    let workers = inner.config.workers.max(1);
    debug!("starting workers ({workers})");
    let mut set = JoinSet::new();
    for id in 0..workers {
        set.spawn(run_worker(inner.clone(), id, stop.clone()));
    }
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            warn!("network path worker ended abnormally: {e}");
        }
    }
}

async fn run_worker(inner: Arc<Inner>, id: usize, mut stop: watch::Receiver<bool>) {
    loop {
        let context = tokio::select! {
            _ = stop.changed() => {
                debug!("[worker{id}] stopped worker");
                return;
            }
            context = async { inner.processing_rx.lock().await.recv().await } => context,
        };
        let Some(context) = context else {
            return;
        };
        debug!(
            "[worker{id}] handling pathtest hostname={}, port={}",
            context.pathtest.hostname, context.pathtest.port
        );

        let start = Instant::now();
        tokio::select! {
            _ = stop.changed() => {
                debug!("[worker{id}] stopped worker during traceroute");
                return;
            }
            _ = inner.run_traceroute_for_path(&context) => {}
        }
        inner.processed_traceroutes.fetch_add(1, Ordering::Relaxed);

        inner.histogram(metrics::WORKER_TASK_DURATION, start.elapsed().as_secs_f64());
        inner.count(metrics::WORKER_PATHTEST_PROCESSED, 1, &[]);
        let interval = context.last_flush_interval();
        if !interval.is_zero() {
            inner.histogram(metrics::WORKER_PATHTEST_INTERVAL, interval.as_secs_f64());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_queued() {
        let (tx, _rx) = mpsc::channel::<u8>(3);
        assert_eq!(queued(&tx), 0);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(queued(&tx), 2);
    }

    #[test]
    fn test_subnets_survive_poisoned_lock() {
        let slot = Arc::new(RwLock::new(Vec::new()));
        let poisoner = slot.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison");
        })
        .join();
        assert!(slot.is_poisoned());

        let subnet: Cidr = "10.0.0.0/8".parse().unwrap();
        store_subnets(&slot, vec![subnet]);
        assert_eq!(load_subnets(&slot), vec![subnet]);
    }
}
