//! RAM 레이어: TTL + LRU + 우선순위 캐시.
//!
//! 프레임은 `Arc<Frame>`으로 보관되어 교체가 포인터 대입 한 번으로 끝납니다.
//! 읽는 쪽은 이전 프레임 또는 새 프레임 전체를 보며, 병합 중간 상태는
//! 관찰할 수 없습니다.
//!
//! 쿼터는 두 단계로 독립 적용됩니다:
//! 1. hot 심볼 상한: `(priority, LRU)` 오름차순으로 ALERT 미만 심볼만 축출
//! 2. 바이트 상한: 우선순위와 무관하게 가장 오래된 LRU 항목부터 축출
//!
//! 키마다 쓰기 세대(generation)를 두어, 하위 레이어에서 읽어 온 프레임을
//! 되채울 때 그 사이 들어온 쓰기를 덮어쓰지 않게 합니다. 세대는 항목이
//! 축출되어도 유지됩니다.

use bar_core::{Frame, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::StoreConfig;

/// 심볼 우선순위.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    Cold = 0,
    #[default]
    Normal = 1,
    Alert = 3,
}

/// (심볼, 타임프레임) 캐시 키.
pub type SeriesKey = (String, Timeframe);

/// 축출 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// hot 심볼 수 상한 초과
    HotSymbolCap,
    /// 바이트 상한 초과
    ByteCap,
}

/// 축출된 항목.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub reason: EvictionReason,
}

struct CacheEntry {
    frame: Arc<Frame>,
    inserted_at: Instant,
    ttl: Duration,
    bytes: usize,
    /// LRU 순번 (클수록 최근)
    recency: u64,
    /// 디스크 전체 이력이 아닌 tail만 들고 있는지 여부
    truncated: bool,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// 프로세스 내 프레임 캐시.
pub struct RamLayer {
    entries: HashMap<SeriesKey, CacheEntry>,
    /// recency → key, 오름차순이 가장 오래된 항목
    lru: BTreeMap<u64, SeriesKey>,
    priorities: HashMap<String, Priority>,
    symbol_entries: HashMap<String, usize>,
    next_recency: u64,
    total_bytes: usize,
    limit_bytes: usize,
    max_symbols_hot: usize,
    ttls: HashMap<Timeframe, Duration>,
    generations: HashMap<SeriesKey, u64>,
}

impl RamLayer {
    /// 새 RAM 레이어를 생성합니다. `ttl_for`는 타임프레임별 항목 수명입니다.
    pub fn new(
        limit_bytes: usize,
        max_symbols_hot: usize,
        ttl_for: impl Fn(Timeframe) -> Duration,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            lru: BTreeMap::new(),
            priorities: HashMap::new(),
            symbol_entries: HashMap::new(),
            next_recency: 0,
            total_bytes: 0,
            limit_bytes,
            max_symbols_hot,
            ttls: Timeframe::ALL.iter().map(|&tf| (tf, ttl_for(tf))).collect(),
            generations: HashMap::new(),
        }
    }

    /// 저장소 설정으로 생성합니다.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.ram_limit_bytes(), config.max_symbols_hot, |tf| {
            config.ram_ttl_for(tf)
        })
    }

    /// 프레임을 조회합니다. 만료된 항목은 제거하고 미스로 처리합니다.
    pub fn get(&mut self, symbol: &str, timeframe: Timeframe) -> Option<Arc<Frame>> {
        self.get_at(symbol, timeframe, Instant::now())
    }

    pub(crate) fn get_at(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        now: Instant,
    ) -> Option<Arc<Frame>> {
        let key = (symbol.to_string(), timeframe);
        let expired = self.entries.get(&key)?.is_expired(now);
        if expired {
            debug!(symbol, tf = %timeframe, "RAM 항목 TTL 만료");
            self.remove_key(&key);
            return None;
        }

        let recency = self.bump_recency();
        let entry = self.entries.get_mut(&key)?;
        self.lru.remove(&entry.recency);
        entry.recency = recency;
        self.lru.insert(recency, key);
        Some(entry.frame.clone())
    }

    /// LRU 순서를 바꾸지 않고 조회합니다 (인벤토리 보고용).
    pub fn peek(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<Frame>> {
        let entry = self.entries.get(&(symbol.to_string(), timeframe))?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.frame.clone())
    }

    /// 프레임을 저장하고 쿼터를 적용합니다. 축출된 항목을 반환합니다.
    pub fn put(&mut self, symbol: &str, timeframe: Timeframe, frame: Arc<Frame>) -> Vec<Eviction> {
        self.insert(symbol, timeframe, frame, false)
    }

    /// 키의 현재 쓰기 세대. 한 번도 쓰인 적 없으면 0.
    pub fn generation(&self, symbol: &str, timeframe: Timeframe) -> u64 {
        self.generations
            .get(&(symbol.to_string(), timeframe))
            .copied()
            .unwrap_or(0)
    }

    /// 항목을 건드리지 않고 쓰기 세대만 올립니다.
    pub fn mark_written(&mut self, symbol: &str, timeframe: Timeframe) {
        *self
            .generations
            .entry((symbol.to_string(), timeframe))
            .or_insert(0) += 1;
    }

    /// `generation` 이후 쓰기가 없었을 때만 저장합니다.
    ///
    /// 그 사이 세대가 바뀌었으면 아무것도 하지 않고 `None`을 반환합니다.
    /// `truncated`는 전체 이력의 tail만 넣을 때(warmup) 표시하며, 이 항목에
    /// 병합하는 쪽은 먼저 하위 레이어의 전체 이력을 합쳐야 합니다.
    pub fn put_if_unchanged(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        frame: Arc<Frame>,
        generation: u64,
        truncated: bool,
    ) -> Option<Vec<Eviction>> {
        if self.generation(symbol, timeframe) != generation {
            return None;
        }
        Some(self.insert(symbol, timeframe, frame, truncated))
    }

    /// 항목이 tail만 들고 있는지 여부.
    pub fn is_truncated(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.entries
            .get(&(symbol.to_string(), timeframe))
            .is_some_and(|e| e.truncated)
    }

    fn insert(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        frame: Arc<Frame>,
        truncated: bool,
    ) -> Vec<Eviction> {
        let key = (symbol.to_string(), timeframe);
        let ttl = self.ttls.get(&timeframe).copied().unwrap_or_default();
        let bytes = frame.estimated_bytes() + symbol.len();

        self.remove_key(&key);
        *self.generations.entry(key.clone()).or_insert(0) += 1;

        let recency = self.bump_recency();
        self.total_bytes += bytes;
        *self.symbol_entries.entry(symbol.to_string()).or_insert(0) += 1;
        self.lru.insert(recency, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                frame,
                inserted_at: Instant::now(),
                ttl,
                bytes,
                recency,
                truncated,
            },
        );

        let mut evicted = self.enforce_hot_cap();
        evicted.extend(self.enforce_byte_cap());
        evicted
    }

    /// 캐시된 프레임의 행 수 (LRU 순서 유지).
    pub fn row_count(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.peek(symbol, timeframe).map_or(0, |f| f.len())
    }

    /// 항목을 제거합니다.
    pub fn remove(&mut self, symbol: &str, timeframe: Timeframe) -> bool {
        self.remove_key(&(symbol.to_string(), timeframe))
    }

    /// 만료된 모든 항목을 제거하고 제거 수를 반환합니다.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&mut self, now: Instant) -> usize {
        let expired: Vec<SeriesKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_key(key);
        }
        expired.len()
    }

    pub fn set_priority(&mut self, symbol: &str, priority: Priority) {
        self.priorities.insert(symbol.to_string(), priority);
    }

    pub fn priority(&self, symbol: &str) -> Priority {
        self.priorities.get(symbol).copied().unwrap_or_default()
    }

    /// 캐시 항목 수.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// RAM에 있는 서로 다른 심볼 수.
    pub fn symbol_count(&self) -> usize {
        self.symbol_entries.len()
    }

    /// 추정 사용 바이트.
    pub fn estimated_bytes(&self) -> usize {
        self.total_bytes
    }

    fn bump_recency(&mut self) -> u64 {
        self.next_recency += 1;
        self.next_recency
    }

    fn remove_key(&mut self, key: &SeriesKey) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.lru.remove(&entry.recency);
        self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
        if let Some(count) = self.symbol_entries.get_mut(&key.0) {
            *count -= 1;
            if *count == 0 {
                self.symbol_entries.remove(&key.0);
            }
        }
        true
    }

    /// hot 심볼 상한. ALERT 심볼은 여기서 보호됩니다.
    fn enforce_hot_cap(&mut self) -> Vec<Eviction> {
        let mut evicted = Vec::new();

        while self.symbol_count() > self.max_symbols_hot {
            let victim = self
                .entries
                .iter()
                .filter(|((symbol, _), _)| self.priority(symbol) < Priority::Alert)
                .min_by_key(|((symbol, _), e)| (self.priority(symbol), e.recency))
                .map(|(k, _)| k.clone());

            let Some(key) = victim else {
                break;
            };
            self.remove_key(&key);
            evicted.push(Eviction {
                symbol: key.0,
                timeframe: key.1,
                reason: EvictionReason::HotSymbolCap,
            });
        }

        evicted
    }

    /// 바이트 상한. 가장 최근 항목 하나는 남깁니다.
    fn enforce_byte_cap(&mut self) -> Vec<Eviction> {
        let mut evicted = Vec::new();

        while self.total_bytes > self.limit_bytes && self.entries.len() > 1 {
            let Some((_, key)) = self.lru.pop_first() else {
                break;
            };
            // lru에서 이미 빠졌으므로 remove_key의 lru 정리는 no-op
            self.remove_key(&key);
            evicted.push(Eviction {
                symbol: key.0,
                timeframe: key.1,
                reason: EvictionReason::ByteCap,
            });
        }

        evicted
    }
}
