//! 통합 계층형 저장소.
//!
//! 읽기는 RAM → Redis/디스크 순으로 내려가며 결과를 RAM에 다시 채웁니다.
//! 쓰기는 RAM 병합 → Redis 미러 → flush 큐(또는 동기 저장) 순서로 진행하고,
//! 이 구간은 쓰기 락 하나로 직렬화됩니다.
//!
//! 읽기 경로의 RAM 되채우기는 쓰기 락을 잡지 않는 대신 조회 시작 시점의
//! 쓰기 세대를 기억해 두고, 그 사이 `put_bars`가 끝났으면 되채우기를
//! 건너뜁니다. `put_bars`는 미러와 적재까지 마친 뒤 세대를 올립니다.
//!
//! 런타임 I/O 실패는 모두 내부에서 복구합니다. `Err`를 돌려주는 것은 생성
//! 단계뿐입니다.

use crate::cold_start::ColdStartEntry;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::flush::{Backpressure, EnqueueOutcome, FlushPolicy, FlushQueue, FlushTask};
use crate::materialize;
use crate::observer::{Layer, MetricsSnapshot, NoopObserver, StoreMetrics, StoreObserver};
use crate::storage::{
    DiskAdapter, Eviction, KeyValueBackend, MemoryBackend, Priority, RamLayer, RedisAdapter,
    RedisBackend, RedisConfig, SeriesKey,
};
use bar_core::{Bar, Frame, Timeframe};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// RAM, Redis, 디스크를 하나로 묶은 OHLCV 저장소.
pub struct UnifiedStore {
    config: StoreConfig,
    ram: Mutex<RamLayer>,
    redis: RedisAdapter,
    disk: Arc<DiskAdapter>,
    queue: Mutex<FlushQueue>,
    policy: FlushPolicy,
    /// put_bars의 병합 → 미러 → 적재 구간 직렬화
    write_lock: Mutex<()>,
    /// flush 큐 소비자 직렬화
    drain_lock: Mutex<()>,
    metrics: StoreMetrics,
    observer: Arc<dyn StoreObserver>,
}

impl UnifiedStore {
    /// 주어진 key-value 백엔드로 저장소를 생성합니다.
    pub fn new(config: StoreConfig, backend: Arc<dyn KeyValueBackend>) -> Result<Self> {
        config.validate()?;

        let retry = config.retry_config();
        let disk = DiskAdapter::new(&config.base_dir, retry)?;
        let redis = RedisAdapter::new(backend, config.namespace.clone(), retry);

        info!(
            namespace = %config.namespace,
            base_dir = %config.base_dir.display(),
            ram_limit_mb = config.ram_limit_mb,
            write_behind = config.write_behind,
            "통합 저장소 초기화"
        );

        Ok(Self {
            ram: Mutex::new(RamLayer::from_config(&config)),
            redis,
            disk: Arc::new(disk),
            queue: Mutex::new(FlushQueue::new()),
            policy: FlushPolicy::from_config(&config),
            write_lock: Mutex::new(()),
            drain_lock: Mutex::new(()),
            metrics: StoreMetrics::new(),
            observer: Arc::new(NoopObserver),
            config,
        })
    }

    /// Redis 서버에 연결해 저장소를 생성합니다.
    pub async fn connect(config: StoreConfig, redis_config: &RedisConfig) -> Result<Self> {
        let backend = RedisBackend::connect(redis_config).await?;
        Self::new(config, Arc::new(backend))
    }

    /// 프로세스 내 key-value 백엔드로 저장소를 생성합니다 (local/test 프로필).
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryBackend::new()))
    }

    /// 관측자를 교체합니다.
    pub fn with_observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn redis(&self) -> &RedisAdapter {
        &self.redis
    }

    pub fn disk(&self) -> &DiskAdapter {
        &self.disk
    }

    // ==================== 읽기 ====================

    /// 프레임을 조회합니다. `limit`이 있으면 마지막 `limit`개만 돌려줍니다.
    ///
    /// 어느 레이어에도 데이터가 없으면 빈 프레임을 반환합니다.
    #[instrument(skip(self))]
    pub async fn get_df(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
    ) -> Arc<Frame> {
        let (cached, generation) = {
            let mut ram = self.ram.lock().await;
            (ram.get(symbol, timeframe), ram.generation(symbol, timeframe))
        };
        self.record_lookup(Layer::Ram, symbol, timeframe, cached.is_some());
        if let Some(frame) = cached {
            return limit_view(frame, limit);
        }

        let frame = self
            .fill_from_lower_layers(symbol, timeframe, generation)
            .await;
        limit_view(frame, limit)
    }

    /// 마지막 바를 조회합니다: RAM tail, 없으면 Redis.
    pub async fn get_last(&self, symbol: &str, timeframe: Timeframe) -> Option<Bar> {
        let cached = self.ram.lock().await.get(symbol, timeframe);
        let from_ram = cached.and_then(|f| f.last().cloned());
        self.record_lookup(Layer::Ram, symbol, timeframe, from_ram.is_some());
        if from_ram.is_some() {
            return from_ram;
        }

        let from_redis = self.redis.get_last_bar(symbol, timeframe).await;
        self.record_lookup(Layer::Redis, symbol, timeframe, from_redis.is_some());
        from_redis
    }

    /// RAM 미스 시 Redis last bar와 디스크(또는 파생) 프레임을 합쳐 RAM에 채웁니다.
    ///
    /// `generation` 이후 쓰기가 있었으면 읽은 프레임은 돌려주기만 하고
    /// RAM에는 넣지 않습니다.
    async fn fill_from_lower_layers(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        generation: u64,
    ) -> Arc<Frame> {
        let redis_bar = self.redis.get_last_bar(symbol, timeframe).await;
        self.record_lookup(Layer::Redis, symbol, timeframe, redis_bar.is_some());

        let key = (symbol.to_string(), timeframe);
        let mut base = self.dirty_or_disk(&key).await;
        if base.is_none() && timeframe.materialization_source().is_some() {
            base = self.materialize(symbol, timeframe).await;
        }

        let frame = match (base, redis_bar) {
            (Some(frame), Some(bar)) => Arc::new(frame.merge(std::slice::from_ref(&bar))),
            (Some(frame), None) => frame,
            (None, Some(bar)) => Arc::new(Frame::from_bars(vec![bar])),
            (None, None) => return Arc::new(Frame::new()),
        };

        self.fill_ram(symbol, timeframe, frame.clone(), generation, false)
            .await;
        frame
    }

    /// 아직 flush되지 않은 프레임, 없으면 디스크 스냅샷.
    async fn dirty_or_disk(&self, key: &SeriesKey) -> Option<Arc<Frame>> {
        let dirty = self.queue.lock().await.peek(key);
        if dirty.is_some() {
            return dirty;
        }
        self.load_disk(&key.0, key.1).await
    }

    /// RAM, 미반영 큐, 디스크 순으로 찾은 프레임.
    async fn resident_frame(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<Frame>> {
        let cached = self.ram.lock().await.get(symbol, timeframe);
        if cached.is_some() {
            return cached;
        }
        self.dirty_or_disk(&(symbol.to_string(), timeframe)).await
    }

    async fn load_disk(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<Frame>> {
        let owned = symbol.to_string();
        let loaded = self
            .run_disk(move |disk| disk.load_snapshot(&owned, timeframe))
            .await;

        let snapshot = match loaded {
            Ok(Some(snapshot)) if !snapshot.frame.is_empty() => snapshot,
            Ok(_) => {
                self.record_lookup(Layer::Disk, symbol, timeframe, false);
                return None;
            }
            Err(e) => {
                warn!(symbol, tf = %timeframe, error = %e, "스냅샷 로드 실패");
                self.record_lookup(Layer::Disk, symbol, timeframe, false);
                return None;
            }
        };
        self.record_lookup(Layer::Disk, symbol, timeframe, true);

        if snapshot.skipped_rows > 0 {
            self.metrics.record_validation_errors(snapshot.skipped_rows);
        }
        if self.config.validate_on_read {
            self.check_frame(symbol, timeframe, &snapshot.frame);
        }

        Some(Arc::new(snapshot.frame))
    }

    /// 하위 타임프레임에서 `target`을 파생합니다.
    ///
    /// 가장 가까운 보유 단계부터 위로 올라가며 중간 단계도 스냅샷으로
    /// 저장하고 RAM에 올립니다. 각 단계는 쓰기 락 아래에서 여전히 비어
    /// 있을 때만 기록하며, 그 사이 데이터가 생긴 단계는 그 데이터를 다음
    /// 단계의 원본으로 씁니다. `target` 자체는 RAM에 올리지 않습니다.
    async fn materialize(&self, symbol: &str, target: Timeframe) -> Option<Arc<Frame>> {
        let mut missing = vec![target];
        let mut base = None;
        for source in materialize::source_chain(target) {
            if let Some(frame) = self.resident_frame(symbol, source).await {
                base = Some((source, frame));
                break;
            }
            missing.push(source);
        }

        let Some((mut source_tf, mut frame)) = base else {
            debug!(symbol, tf = %target, "파생할 하위 데이터 없음");
            return None;
        };

        for &timeframe in missing.iter().rev() {
            let _guard = self.write_lock.lock().await;

            if let Some(existing) = self.resident_frame(symbol, timeframe).await {
                debug!(symbol, tf = %timeframe, "파생 중 기존 데이터 발견, 그대로 사용");
                frame = existing;
                source_tf = timeframe;
                continue;
            }

            let derived = materialize::aggregate(&frame, source_tf, timeframe);
            if derived.is_empty() {
                debug!(symbol, from = %source_tf, to = %timeframe, "완전한 버킷 없음");
                return None;
            }

            let derived = Arc::new(derived);
            info!(
                symbol,
                from = %source_tf,
                to = %timeframe,
                rows = derived.len(),
                "타임프레임 파생"
            );
            self.metrics.record_materialized();

            if self.persist(symbol, timeframe, derived.clone()).await.is_err() {
                self.enqueue_flush((symbol.to_string(), timeframe), derived.clone())
                    .await;
            }
            if timeframe != target {
                self.cache_in_ram(symbol, timeframe, derived.clone()).await;
            }

            frame = derived;
            source_tf = timeframe;
        }

        Some(frame)
    }

    // ==================== 쓰기 ====================

    /// 바를 병합해 저장합니다.
    ///
    /// 빈 입력은 경고 후 무시합니다. 검증 실패는 기록만 하고 계속 진행합니다.
    pub async fn put_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        if bars.is_empty() {
            warn!(symbol, tf = %timeframe, "빈 바 목록, 무시");
            return;
        }

        let span = bar_core::series_span!("put_bars", symbol, timeframe);
        self.put_bars_inner(symbol, timeframe, bars)
            .instrument(span)
            .await
    }

    async fn put_bars_inner(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        if self.config.validate_on_write {
            self.check_frame(symbol, timeframe, &Frame::from_bars(bars.clone()));
        }

        let _guard = self.write_lock.lock().await;
        let key = (symbol.to_string(), timeframe);

        let merged = match self.current_frame(&key).await {
            Some(current) => {
                if !current.is_append_only(&bars) {
                    debug!(rows = bars.len(), "일반 경로 병합");
                }
                Arc::new(current.merge(&bars))
            }
            None => Arc::new(Frame::from_bars(bars)),
        };

        self.cache_in_ram(symbol, timeframe, merged.clone()).await;

        if let Some(last) = merged.last() {
            let ttl = self.config.redis_ttl_for(timeframe);
            self.redis.set_last_bar(symbol, timeframe, last, ttl).await;
        }

        if self.config.write_behind {
            self.enqueue_flush(key, merged).await;
        } else if self.persist(symbol, timeframe, merged.clone()).await.is_err() {
            self.enqueue_flush(key, merged).await;
        }

        // 이 시점 이전에 시작된 되채우기는 모두 무효
        self.ram.lock().await.mark_written(symbol, timeframe);
    }

    /// 병합 기준 프레임. tail만 든 RAM 항목은 전체 이력과 다시 합칩니다.
    async fn current_frame(&self, key: &SeriesKey) -> Option<Arc<Frame>> {
        let (cached, truncated) = {
            let mut ram = self.ram.lock().await;
            let cached = ram.get(&key.0, key.1);
            (cached, ram.is_truncated(&key.0, key.1))
        };

        match cached {
            Some(frame) if !truncated => Some(frame),
            Some(tail) => match self.dirty_or_disk(key).await {
                Some(full) => Some(Arc::new(full.merge(tail.bars()))),
                None => Some(tail),
            },
            None => self.dirty_or_disk(key).await,
        }
    }

    async fn enqueue_flush(&self, key: SeriesKey, frame: Arc<Frame>) {
        let (outcome, backlog) = {
            let mut queue = self.queue.lock().await;
            let outcome = queue.enqueue(key, frame);
            (outcome, queue.len())
        };
        if outcome == EnqueueOutcome::Coalesced {
            self.metrics.record_coalesced();
        }
        self.report_backpressure(backlog);
    }

    fn report_backpressure(&self, backlog: usize) {
        let level = self.policy.pressure(backlog);
        match level {
            Backpressure::Normal => return,
            Backpressure::Soft => warn!(backlog, soft = self.policy.soft, "flush 백로그 경고"),
            Backpressure::Hard => error!(backlog, hard = self.policy.hard, "flush 백로그 임계 초과"),
        }
        self.observer.on_backpressure(backlog, level);
    }

    /// 프레임을 디스크에 저장하고 결과를 기록합니다.
    async fn persist(&self, symbol: &str, timeframe: Timeframe, frame: Arc<Frame>) -> Result<()> {
        let owned = symbol.to_string();
        let result = self
            .run_disk(move |disk| disk.save_bars(&owned, timeframe, &frame))
            .await;

        let ok = result.is_ok();
        self.metrics.record_flush(ok);
        self.observer.on_flush(symbol, timeframe, ok);
        if let Err(e) = &result {
            warn!(symbol, tf = %timeframe, error = %e, "스냅샷 저장 실패");
        }
        result
    }

    // ==================== flush ====================

    /// flush 큐를 비웁니다. 저장에 성공한 작업 수를 반환합니다.
    ///
    /// 일반 모드는 백로그에 맞춘 배치 하나만 처리하고, 실패하면 작업을 큐
    /// 앞에 되돌린 뒤 `io_retry_backoff`만큼 쉬고 멈춥니다. 강제 모드는 큐가
    /// 빌 때까지 처리하되 같은 작업이 `io_retry_attempts`번 실패하면 큐에
    /// 남겨 둡니다.
    pub async fn drain_flush_queue(&self, force: bool) -> usize {
        let _drain = self.drain_lock.lock().await;

        let backlog = self.queue.lock().await.len();
        if backlog == 0 {
            return 0;
        }
        let budget = if force {
            usize::MAX
        } else {
            self.policy.batch_size(backlog)
        };
        debug!(backlog, budget, force, "flush 큐 처리");

        let max_failures = self.config.io_retry_attempts.max(1);
        let mut failures: HashMap<SeriesKey, u32> = HashMap::new();
        let mut parked: Vec<FlushTask> = Vec::new();
        let mut processed = 0;
        let mut flushed = 0;

        while processed < budget {
            let next = self.queue.lock().await.pop_front();
            let Some(task) = next else {
                break;
            };
            processed += 1;

            let (symbol, timeframe) = (task.key.0.clone(), task.key.1);
            if self
                .persist(&symbol, timeframe, task.frame.clone())
                .await
                .is_ok()
            {
                self.queue.lock().await.complete(&task.key);
                flushed += 1;
                continue;
            }

            if !force {
                self.queue.lock().await.requeue_front(task);
                tokio::time::sleep(self.config.io_retry_backoff()).await;
                break;
            }

            let count = failures.entry(task.key.clone()).or_insert(0);
            *count += 1;
            if *count >= max_failures {
                error!(symbol = %symbol, tf = %timeframe, attempts = *count, "강제 flush 포기, 큐에 남김");
                parked.push(task);
            } else {
                self.queue.lock().await.requeue_front(task);
                tokio::time::sleep(self.config.io_retry_backoff()).await;
            }
        }

        if !parked.is_empty() {
            let mut queue = self.queue.lock().await;
            for task in parked {
                queue.requeue_front(task);
            }
        }

        flushed
    }

    /// 큐 전체를 즉시 디스크에 반영합니다.
    pub async fn flush_all(&self) -> usize {
        self.drain_flush_queue(true).await
    }

    /// flush 대기 작업 수.
    pub async fn flush_backlog(&self) -> usize {
        self.queue.lock().await.len()
    }

    // ==================== 운영 ====================

    /// 만료된 RAM 항목을 정리합니다.
    pub async fn sweep(&self) -> usize {
        let removed = self.ram.lock().await.sweep();
        if removed > 0 {
            debug!(removed, "RAM TTL 정리");
        }
        removed
    }

    /// 심볼들의 디스크 스냅샷 tail을 RAM에 올립니다. 올린 심볼 수를 반환합니다.
    ///
    /// 이미 RAM에 있는 심볼은 건너뜁니다.
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub async fn warmup(&self, symbols: &[String], timeframe: Timeframe, bars_needed: usize) -> usize {
        let loads = symbols.iter().map(|symbol| async move {
            let generation = {
                let ram = self.ram.lock().await;
                if ram.peek(symbol, timeframe).is_some() {
                    return None;
                }
                ram.generation(symbol, timeframe)
            };
            let frame = self.dirty_or_disk(&(symbol.clone(), timeframe)).await?;
            Some((symbol.as_str(), frame, generation))
        });
        let loaded: Vec<_> = join_all(loads).await.into_iter().flatten().collect();

        let mut count = 0;
        for (symbol, frame, generation) in loaded {
            let truncated = bars_needed > 0 && frame.len() > bars_needed;
            let frame = if truncated {
                Arc::new(frame.tail(bars_needed))
            } else {
                frame
            };
            if self
                .fill_ram(symbol, timeframe, frame, generation, truncated)
                .await
            {
                count += 1;
            }
        }

        info!(loaded = count, tf = %timeframe, "RAM warmup 완료");
        count
    }

    /// 심볼별 레이어 보유 현황을 조사합니다.
    pub async fn build_cold_start_report(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Vec<ColdStartEntry> {
        let now_ms = Utc::now().timestamp_millis();
        let entries = symbols
            .iter()
            .map(|symbol| self.inspect_symbol(symbol, timeframe, now_ms));
        join_all(entries).await
    }

    async fn inspect_symbol(&self, symbol: &str, timeframe: Timeframe, now_ms: i64) -> ColdStartEntry {
        let (rows_in_ram, last_ts_ram) = {
            let ram = self.ram.lock().await;
            ram.peek(symbol, timeframe)
                .map_or((0, None), |f| (f.len(), f.last_open_time()))
        };

        let owned = symbol.to_string();
        let disk = self
            .run_disk(move |disk| {
                let stats = disk.row_stats(&owned, timeframe)?;
                Ok((stats, disk.modified_at(&owned, timeframe)))
            })
            .await;
        let ((rows_on_disk, last_ts_disk), disk_mtime) = match disk {
            Ok((stats, mtime)) => (stats.unwrap_or((0, None)), mtime),
            Err(e) => {
                warn!(symbol, tf = %timeframe, error = %e, "디스크 인벤토리 조회 실패");
                ((0, None), None)
            }
        };

        let redis_ttl_secs = self.redis.last_bar_ttl(symbol, timeframe).await;
        let last_ts_redis = self
            .redis
            .get_last_bar(symbol, timeframe)
            .await
            .map(|b| b.open_time);

        ColdStartEntry {
            symbol: symbol.to_string(),
            timeframe,
            rows_in_ram,
            rows_on_disk,
            redis_ttl_secs,
            last_ts_ram,
            last_ts_disk,
            last_ts_redis,
            age_secs: None,
            disk_mtime,
        }
        .with_age(now_ms)
    }

    pub async fn set_priority(&self, symbol: &str, priority: Priority) {
        self.ram.lock().await.set_priority(symbol, priority);
    }

    pub async fn priority(&self, symbol: &str) -> Priority {
        self.ram.lock().await.priority(symbol)
    }

    /// 현재 메트릭 스냅샷.
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let backlog = self.queue.lock().await.len();
        let (ram_bytes, ram_entries) = {
            let ram = self.ram.lock().await;
            (ram.estimated_bytes(), ram.len())
        };
        self.metrics.snapshot(backlog, ram_bytes, ram_entries)
    }

    // ==================== 내부 ====================

    async fn cache_in_ram(&self, symbol: &str, timeframe: Timeframe, frame: Arc<Frame>) {
        let evictions = self.ram.lock().await.put(symbol, timeframe, frame);
        self.note_evictions(&evictions);
    }

    /// 하위 레이어에서 읽은 프레임을 RAM에 되채웁니다. 넣었으면 `true`.
    async fn fill_ram(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        frame: Arc<Frame>,
        generation: u64,
        truncated: bool,
    ) -> bool {
        let evictions = self.ram.lock().await.put_if_unchanged(
            symbol,
            timeframe,
            frame,
            generation,
            truncated,
        );
        match evictions {
            Some(evictions) => {
                self.note_evictions(&evictions);
                true
            }
            None => {
                debug!(symbol, tf = %timeframe, "조회 중 쓰기 발생, RAM 되채우기 생략");
                false
            }
        }
    }

    fn note_evictions(&self, evictions: &[Eviction]) {
        if evictions.is_empty() {
            return;
        }
        self.metrics.record_evictions(evictions.len());
        for eviction in evictions {
            self.observer.on_eviction(eviction);
        }
    }

    fn check_frame(&self, symbol: &str, timeframe: Timeframe, frame: &Frame) {
        let violations = frame.validate();
        if violations.is_empty() {
            return;
        }
        warn!(
            symbol,
            tf = %timeframe,
            count = violations.len(),
            first = %violations[0],
            "데이터 검증 실패"
        );
        self.metrics.record_validation_errors(violations.len());
        self.observer
            .on_validation_failure(symbol, timeframe, &violations);
    }

    fn record_lookup(&self, layer: Layer, symbol: &str, timeframe: Timeframe, hit: bool) {
        self.metrics.record_lookup(layer, hit);
        self.observer.on_lookup(layer, symbol, timeframe, hit);
    }

    /// 디스크 작업을 blocking 스레드에서 실행합니다.
    async fn run_disk<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&DiskAdapter) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let disk = self.disk.clone();
        tokio::task::spawn_blocking(move || f(&*disk)).await?
    }
}

fn limit_view(frame: Arc<Frame>, limit: Option<usize>) -> Arc<Frame> {
    match limit {
        Some(n) if n < frame.len() => Arc::new(frame.tail(n)),
        _ => frame,
    }
}
