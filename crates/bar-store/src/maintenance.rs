//! 백그라운드 유지보수 루프와 감독자.
//!
//! 루프는 tick마다 RAM TTL을 정리하고 flush 큐를 비웁니다. 백로그가 있으면
//! 50ms, 없으면 1초 간격으로 돌며, 취소되면 강제 flush 한 번 후 종료합니다.
//!
//! `MaintenanceSupervisor`는 루프가 패닉하면 지수 백오프로 재시작하고
//! 모든 상태 변화를 `MaintenanceEvent`로 알립니다.

use crate::store::UnifiedStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const BUSY_TICK: Duration = Duration::from_millis(50);
const IDLE_TICK: Duration = Duration::from_secs(1);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 유지보수 루프를 실행합니다. 종료 시 강제 flush한 작업 수를 반환합니다.
pub async fn run_maintenance(store: Arc<UnifiedStore>, cancel: CancellationToken) -> usize {
    info!("유지보수 루프 시작");

    loop {
        let delay = if store.flush_backlog().await > 0 {
            BUSY_TICK
        } else {
            IDLE_TICK
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                info!("유지보수 루프: 종료 시그널 수신, 강제 flush");
                break;
            }
        }

        store.sweep().await;
        store.drain_flush_queue(false).await;
    }

    let drained = store.flush_all().await;
    let remaining = store.flush_backlog().await;
    if remaining > 0 {
        error!(remaining, "종료 시점에 저장되지 않은 flush 작업이 남음");
    }
    info!(drained, "유지보수 루프 종료");
    drained
}

/// 감독자가 보고하는 이벤트.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceEvent {
    Started,
    /// 루프 패닉
    Panicked { restarts: u32, message: String },
    /// 백오프 후 재시작
    Restarted { attempt: u32, delay: Duration },
    /// 정상 종료
    Stopped { drained: usize },
}

/// 유지보수 루프 감독자.
pub struct MaintenanceSupervisor {
    store: Arc<UnifiedStore>,
    cancel: CancellationToken,
    events: mpsc::Sender<MaintenanceEvent>,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl MaintenanceSupervisor {
    /// 감독자와 이벤트 수신 채널을 생성합니다.
    pub fn new(
        store: Arc<UnifiedStore>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<MaintenanceEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let supervisor = Self {
            store,
            cancel,
            events,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        };
        (supervisor, rx)
    }

    /// 재시작 백오프를 설정합니다.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max.max(base);
        self
    }

    /// `restarts`번째 재시작 전 대기 시간.
    pub fn backoff_for(&self, restarts: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << restarts.min(16))
            .min(self.max_backoff)
    }

    /// 감독 태스크를 띄웁니다.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// 취소될 때까지 유지보수 루프를 감독합니다.
    pub async fn run(self) {
        let store = self.store.clone();
        let cancel = self.cancel.clone();
        self.supervise(move || run_maintenance(store.clone(), cancel.clone()))
            .await
    }

    async fn supervise<F, Fut>(&self, mut make_loop: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = usize> + Send + 'static,
    {
        self.emit(MaintenanceEvent::Started);
        let mut restarts = 0u32;

        loop {
            let message = match tokio::spawn(make_loop()).await {
                Ok(drained) => {
                    self.emit(MaintenanceEvent::Stopped { drained });
                    return;
                }
                Err(e) if e.is_panic() => panic_message(e.into_panic()),
                Err(e) => {
                    warn!(error = %e, "유지보수 태스크 취소됨");
                    self.emit(MaintenanceEvent::Stopped { drained: 0 });
                    return;
                }
            };

            error!(restarts, message = %message, "유지보수 루프 패닉");
            self.emit(MaintenanceEvent::Panicked { restarts, message });

            let delay = self.backoff_for(restarts);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    // 재시작 대기 중 종료되면 여기서 직접 비운다
                    let drained = self.store.flush_all().await;
                    self.emit(MaintenanceEvent::Stopped { drained });
                    return;
                }
            }

            restarts += 1;
            info!(attempt = restarts, delay_ms = delay.as_millis() as u64, "유지보수 루프 재시작");
            self.emit(MaintenanceEvent::Restarted {
                attempt: restarts,
                delay,
            });
        }
    }

    fn emit(&self, event: MaintenanceEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "유지보수 이벤트 전달 실패");
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
