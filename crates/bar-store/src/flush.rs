//! write-behind flush 큐.
//!
//! 같은 (심볼, 타임프레임)의 연속 put은 하나의 작업으로 합쳐지며, 작업은
//! 최신 프레임을 들고 처음 들어온 자리를 유지합니다.

use crate::config::StoreConfig;
use crate::storage::SeriesKey;
use bar_core::Frame;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// 큐 적재 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 새 작업으로 추가됨
    Queued,
    /// 기존 작업에 합쳐짐
    Coalesced,
}

/// 백로그 압력 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Backpressure {
    Normal,
    Soft,
    Hard,
}

/// 대기 중인 flush 작업.
#[derive(Debug, Clone)]
pub struct FlushTask {
    pub key: SeriesKey,
    pub frame: Arc<Frame>,
}

/// 키 단위로 합쳐지는 FIFO 큐.
///
/// 꺼낸 작업은 `complete` 또는 `requeue_front`가 호출될 때까지 in-flight로
/// 남아 `peek`에 보입니다.
#[derive(Debug, Default)]
pub struct FlushQueue {
    order: VecDeque<SeriesKey>,
    pending: HashMap<SeriesKey, Arc<Frame>>,
    in_flight: HashMap<SeriesKey, Arc<Frame>>,
}

impl FlushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 작업을 추가합니다. 이미 대기 중인 키면 프레임만 교체합니다.
    pub fn enqueue(&mut self, key: SeriesKey, frame: Arc<Frame>) -> EnqueueOutcome {
        match self.pending.insert(key.clone(), frame) {
            Some(_) => EnqueueOutcome::Coalesced,
            None => {
                self.order.push_back(key);
                EnqueueOutcome::Queued
            }
        }
    }

    /// 가장 오래된 작업을 꺼냅니다.
    pub fn pop_front(&mut self) -> Option<FlushTask> {
        while let Some(key) = self.order.pop_front() {
            if let Some(frame) = self.pending.remove(&key) {
                self.in_flight.insert(key.clone(), frame.clone());
                return Some(FlushTask { key, frame });
            }
        }
        None
    }

    /// 실패한 작업을 맨 앞에 되돌립니다.
    ///
    /// 그 사이 같은 키로 더 새로운 작업이 들어왔으면 새 작업이 이기고
    /// `false`를 반환합니다.
    pub fn requeue_front(&mut self, task: FlushTask) -> bool {
        self.in_flight.remove(&task.key);
        if self.pending.contains_key(&task.key) {
            return false;
        }
        self.pending.insert(task.key.clone(), task.frame);
        self.order.push_front(task.key);
        true
    }

    /// 저장이 끝난 작업을 in-flight에서 지웁니다.
    pub fn complete(&mut self, key: &SeriesKey) {
        self.in_flight.remove(key);
    }

    /// 아직 디스크에 반영되지 않은 가장 최신 프레임.
    pub fn peek(&self, key: &SeriesKey) -> Option<Arc<Frame>> {
        self.pending
            .get(key)
            .or_else(|| self.in_flight.get(key))
            .cloned()
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// 백로그 임계치와 배치 크기 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub batch_max: usize,
    pub soft: usize,
    pub hard: usize,
}

impl FlushPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            batch_max: config.flush_batch_max.max(1),
            soft: config.flush_queue_soft,
            hard: config.flush_queue_hard,
        }
    }

    pub fn pressure(&self, backlog: usize) -> Backpressure {
        if backlog >= self.hard {
            Backpressure::Hard
        } else if backlog >= self.soft {
            Backpressure::Soft
        } else {
            Backpressure::Normal
        }
    }

    /// 백로그에 따른 이번 tick 배치 크기.
    pub fn batch_size(&self, backlog: usize) -> usize {
        match self.pressure(backlog) {
            Backpressure::Normal => self.batch_max,
            Backpressure::Soft => self.batch_max * 2,
            Backpressure::Hard => self.batch_max * 4,
        }
    }
}
