//! 디스크 스냅샷 레이어.
//!
//! (심볼, 타임프레임)마다 `<base_dir>/<symbol>_bars_<tf>_snapshot.jsonl` 파일
//! 하나를 유지합니다. 쓰기는 임시 파일 → fsync → rename으로 원자적이며,
//! 읽기는 저장된 타임스탬프 단위를 자동 판별해 ms로 정규화합니다.
//!
//! 모든 함수는 blocking I/O입니다. 비동기 코드에서는
//! `tokio::task::spawn_blocking`으로 호출해야 합니다.

use crate::error::{Result, StoreError};
use crate::retry::RetryConfig;
use bar_core::{Bar, Frame, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// 로드 시 허용하는 과거 범위 (일).
const SANITY_PAST_DAYS: i64 = 400;
/// 로드 시 허용하는 미래 범위 (시간).
const SANITY_FUTURE_HOURS: i64 = 12;

/// 로드된 스냅샷과 정제 통계.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub frame: Frame,
    /// 파싱에 실패해 건너뛴 줄 수
    pub skipped_rows: usize,
    /// 유효 시간 범위 밖이라 제외된 행 수
    pub filtered_rows: usize,
    /// 레거시 단일 JSON 문서에서 읽었는지 여부
    pub legacy_format: bool,
}

/// 타임스탬프 단위.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl EpochUnit {
    /// 값의 크기로 단위를 판별합니다.
    pub fn detect(value: f64) -> Self {
        let v = value.abs();
        if v < 1e11 {
            EpochUnit::Seconds
        } else if v < 1e14 {
            EpochUnit::Millis
        } else if v < 1e17 {
            EpochUnit::Micros
        } else {
            EpochUnit::Nanos
        }
    }

    /// 이 단위의 값을 epoch ms로 변환합니다.
    pub fn to_millis(&self, value: f64) -> i64 {
        let ms = match self {
            EpochUnit::Seconds => value * 1_000.0,
            EpochUnit::Millis => value,
            EpochUnit::Micros => value / 1_000.0,
            EpochUnit::Nanos => value / 1_000_000.0,
        };
        ms.round() as i64
    }
}

/// 디스크에 저장된 행. 타임스탬프 단위가 섞여 있을 수 있습니다.
#[derive(Debug, Clone, Deserialize)]
struct RawBar {
    open_time: f64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    #[serde(default)]
    close_time: Option<f64>,
    #[serde(default)]
    is_closed: Option<bool>,
}

/// 레거시 컬럼 지향 문서 (`{"open_time": [...], "open": [...], ...}`).
#[derive(Debug, Deserialize)]
struct ColumnarSnapshot {
    open_time: Vec<f64>,
    open: Vec<Decimal>,
    high: Vec<Decimal>,
    low: Vec<Decimal>,
    close: Vec<Decimal>,
    volume: Vec<Decimal>,
    #[serde(default)]
    close_time: Option<Vec<f64>>,
    #[serde(default)]
    is_closed: Option<Vec<Option<bool>>>,
}

impl ColumnarSnapshot {
    fn into_rows(self) -> Result<Vec<RawBar>> {
        let n = self.open_time.len();
        let lengths = [
            self.open.len(),
            self.high.len(),
            self.low.len(),
            self.close.len(),
            self.volume.len(),
            self.close_time.as_ref().map_or(n, Vec::len),
            self.is_closed.as_ref().map_or(n, Vec::len),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(StoreError::InvalidData(
                "레거시 스냅샷 컬럼 길이가 일치하지 않습니다".into(),
            ));
        }

        Ok((0..n)
            .map(|i| RawBar {
                open_time: self.open_time[i],
                open: self.open[i],
                high: self.high[i],
                low: self.low[i],
                close: self.close[i],
                volume: self.volume[i],
                close_time: self.close_time.as_ref().map(|c| c[i]),
                is_closed: self.is_closed.as_ref().and_then(|c| c[i]),
            })
            .collect())
    }
}

/// 스냅샷 파일 어댑터.
pub struct DiskAdapter {
    base_dir: PathBuf,
    retry: RetryConfig,
    /// 임시 파일 이름 충돌 방지용 순번
    temp_seq: AtomicU64,
}

impl DiskAdapter {
    /// 디렉토리를 만들고 어댑터를 생성합니다.
    pub fn new(base_dir: impl Into<PathBuf>, retry: RetryConfig) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| {
            StoreError::Config(format!(
                "스냅샷 디렉토리를 만들 수 없습니다 {}: {}",
                base_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            base_dir,
            retry,
            temp_seq: AtomicU64::new(0),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 스냅샷 파일 경로.
    pub fn snapshot_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_dir
            .join(format!("{}_bars_{}_snapshot.jsonl", symbol, timeframe))
    }

    pub fn exists(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.snapshot_path(symbol, timeframe).is_file()
    }

    /// 스냅샷 파일 수정 시각.
    pub fn modified_at(&self, symbol: &str, timeframe: Timeframe) -> Option<DateTime<Utc>> {
        let modified = fs::metadata(self.snapshot_path(symbol, timeframe))
            .and_then(|m| m.modified())
            .ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// 프레임을 원자적으로 저장합니다.
    pub fn save_bars(&self, symbol: &str, timeframe: Timeframe, frame: &Frame) -> Result<()> {
        let target = self.snapshot_path(symbol, timeframe);
        let payload = encode_jsonl(frame)?;
        let tmp = self.temp_path(&target);

        write_synced(&tmp, &payload)?;

        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match fs::rename(&tmp, &target) {
                Ok(()) => {
                    debug!(symbol, tf = %timeframe, rows = frame.len(), "스냅샷 저장 완료");
                    return Ok(());
                }
                Err(e) if attempt + 1 < attempts => {
                    if !tmp.exists() {
                        // 경쟁하는 flush가 임시 파일을 치웠으면 다시 만든다
                        warn!(symbol, tf = %timeframe, "임시 파일 유실, 재생성 후 재시도");
                        write_synced(&tmp, &payload)?;
                    } else {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            symbol,
                            tf = %timeframe,
                            attempt = attempt + 1,
                            error = %e,
                            "스냅샷 rename 실패, {}ms 후 재시도",
                            delay.as_millis()
                        );
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    return Err(e.into());
                }
            }
        }
    }

    /// 스냅샷 행 수와 마지막 open_time. 파일이 없으면 `None`.
    pub fn row_stats(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<(usize, Option<i64>)>> {
        Ok(self
            .load_bars(symbol, timeframe)?
            .map(|frame| (frame.len(), frame.last_open_time())))
    }

    /// 스냅샷 프레임을 로드합니다. 파일이 없으면 `None`.
    pub fn load_bars(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Frame>> {
        Ok(self.load_snapshot(symbol, timeframe)?.map(|s| s.frame))
    }

    /// 스냅샷을 정제 통계와 함께 로드합니다.
    pub fn load_snapshot(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path(symbol, timeframe);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let parsed = parse_snapshot(&content)?;
        if parsed.skipped_rows > 0 {
            warn!(
                symbol,
                tf = %timeframe,
                skipped = parsed.skipped_rows,
                "손상된 스냅샷 행을 건너뜀"
            );
        }

        let bars = normalize_rows(parsed.rows, timeframe);
        let (bars, filtered_rows) = sanity_filter(bars, Utc::now().timestamp_millis());
        if filtered_rows > 0 {
            debug!(symbol, tf = %timeframe, filtered = filtered_rows, "유효 범위 밖 행 제외");
        }

        Ok(Some(Snapshot {
            frame: Frame::from_bars(bars),
            skipped_rows: parsed.skipped_rows,
            filtered_rows,
            legacy_format: parsed.legacy,
        }))
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let thread_tag: String = format!("{:?}", std::thread::current().id())
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);

        self.base_dir.join(format!(
            ".{}.{}.{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            thread_tag,
            nanos,
            seq
        ))
    }
}

struct ParsedRows {
    rows: Vec<RawBar>,
    skipped_rows: usize,
    legacy: bool,
}

fn encode_jsonl(frame: &Frame) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(frame.len() * 128);
    for bar in frame {
        serde_json::to_writer(&mut buf, bar)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

fn write_synced(path: &Path, payload: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(payload)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// JSONL을 우선 시도하고, 안 되면 레거시 단일 문서로 읽습니다.
fn parse_snapshot(content: &str) -> Result<ParsedRows> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let rows: Vec<RawBar> = serde_json::from_str(trimmed)?;
        return Ok(ParsedRows {
            rows,
            skipped_rows: 0,
            legacy: true,
        });
    }

    let mut rows = Vec::new();
    let mut skipped_rows = 0;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawBar>(line) {
            Ok(row) => rows.push(row),
            Err(_) => skipped_rows += 1,
        }
    }

    if rows.is_empty() && skipped_rows > 0 {
        if let Ok(columnar) = serde_json::from_str::<ColumnarSnapshot>(content) {
            return Ok(ParsedRows {
                rows: columnar.into_rows()?,
                skipped_rows: 0,
                legacy: true,
            });
        }
        return Err(StoreError::InvalidData(
            "스냅샷에서 읽을 수 있는 행이 없습니다".into(),
        ));
    }

    Ok(ParsedRows {
        rows,
        skipped_rows,
        legacy: false,
    })
}

/// 중앙값으로 타임스탬프 단위를 판별해 모든 행을 ms로 변환합니다.
fn normalize_rows(rows: Vec<RawBar>, timeframe: Timeframe) -> Vec<Bar> {
    if rows.is_empty() {
        return Vec::new();
    }

    let mut times: Vec<f64> = rows.iter().map(|r| r.open_time).collect();
    times.sort_by(|a, b| a.total_cmp(b));
    let unit = EpochUnit::detect(times[times.len() / 2]);

    rows.into_iter()
        .map(|r| {
            let open_time = unit.to_millis(r.open_time);
            let close_time = r
                .close_time
                .map(|c| unit.to_millis(c))
                .unwrap_or(open_time + timeframe.as_millis() - 1);
            Bar {
                open_time,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
                close_time,
                is_closed: r.is_closed,
            }
        })
        .collect()
}

/// `now-400d .. now+12h` 밖의 행을 제외합니다.
///
/// 전부 제외되면 원본을 그대로 돌려줍니다.
fn sanity_filter(bars: Vec<Bar>, now_ms: i64) -> (Vec<Bar>, usize) {
    let lower = now_ms - SANITY_PAST_DAYS * 86_400_000;
    let upper = now_ms + SANITY_FUTURE_HOURS * 3_600_000;

    let total = bars.len();
    let kept: Vec<Bar> = bars
        .iter()
        .filter(|b| b.open_time >= lower && b.open_time <= upper)
        .cloned()
        .collect();

    if kept.is_empty() && total > 0 {
        warn!(rows = total, "모든 행이 유효 범위 밖, 필터 없이 반환");
        return (bars, 0);
    }
    let filtered = total - kept.len();
    (kept, filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn adapter(dir: &Path) -> DiskAdapter {
        DiskAdapter::new(dir, RetryConfig::new(3, Duration::from_millis(1))).unwrap()
    }

    fn recent_frame(rows: i64) -> Frame {
        let start = Timeframe::M1.bucket_start(Utc::now().timestamp_millis()) - rows * 60_000;
        Frame::from_bars(
            (0..rows)
                .map(|i| {
                    let t = start + i * 60_000;
                    Bar::new(t, dec!(10), dec!(12), dec!(9), dec!(11.5), dec!(3.25), t + 59_999)
                        .with_closed(true)
                })
                .collect(),
        )
    }

    #[test]
    fn test_snapshot_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        assert_eq!(
            disk.snapshot_path("xauusd", Timeframe::M5),
            dir.path().join("xauusd_bars_5m_snapshot.jsonl")
        );
    }

    #[test]
    fn test_save_load_roundtrip_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        let frame = recent_frame(5);

        disk.save_bars("btc", Timeframe::M1, &frame).unwrap();
        let loaded = disk.load_bars("btc", Timeframe::M1).unwrap().unwrap();
        assert_eq!(loaded, frame);
        assert_eq!(
            disk.row_stats("btc", Timeframe::M1).unwrap(),
            Some((5, frame.last_open_time()))
        );

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        assert!(disk.modified_at("btc", Timeframe::M1).is_some());
    }

    #[test]
    fn test_high_precision_prices_are_exact_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        let t = Timeframe::M1.bucket_start(Utc::now().timestamp_millis()) - 60_000;
        let precise = dec!(12345678.123456789);
        let frame = Frame::from_bars(vec![Bar::new(
            t,
            precise,
            precise,
            precise,
            precise,
            dec!(0.000000000123456789),
            t + 59_999,
        )]);

        disk.save_bars("xau", Timeframe::M1, &frame).unwrap();
        let loaded = disk.load_bars("xau", Timeframe::M1).unwrap().unwrap();
        assert_eq!(loaded.bars()[0].close, precise);
        assert_eq!(loaded, frame);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        assert!(disk.load_bars("nope", Timeframe::M1).unwrap().is_none());
        assert!(!disk.exists("nope", Timeframe::M1));
    }

    #[test]
    fn test_epoch_unit_detection() {
        assert_eq!(EpochUnit::detect(1.7e9), EpochUnit::Seconds);
        assert_eq!(EpochUnit::detect(1.7e12), EpochUnit::Millis);
        assert_eq!(EpochUnit::detect(1.7e15), EpochUnit::Micros);
        assert_eq!(EpochUnit::detect(1.7e18), EpochUnit::Nanos);
        assert_eq!(EpochUnit::Seconds.to_millis(1_700_000_000.0), 1_700_000_000_000);
        assert_eq!(EpochUnit::Nanos.to_millis(1.7e18), 1_700_000_000_000);
    }

    #[test]
    fn test_loads_second_resolution_rows() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        let now_s = Utc::now().timestamp() / 60 * 60;
        let content = format!(
            "{{\"open_time\":{},\"open\":1,\"high\":2,\"low\":0.5,\"close\":1.5,\"volume\":10,\"close_time\":{}}}\n",
            now_s - 60,
            now_s - 1
        );
        fs::write(disk.snapshot_path("eth", Timeframe::M1), content).unwrap();

        let frame = disk.load_bars("eth", Timeframe::M1).unwrap().unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.bars()[0].open_time, (now_s - 60) * 1000);
        assert_eq!(frame.bars()[0].close_time, (now_s - 1) * 1000);
    }

    #[test]
    fn test_sanity_filter_drops_outliers_but_never_empties() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        let mut frame = recent_frame(3).into_bars();
        // 2001년 행은 손상으로 간주
        frame.push(Bar::new(
            1_000_000_000_000,
            dec!(1),
            dec!(1),
            dec!(1),
            dec!(1),
            dec!(1),
            1_000_000_059_999,
        ));
        disk.save_bars("sol", Timeframe::M1, &Frame::from_bars(frame))
            .unwrap();
        let snapshot = disk.load_snapshot("sol", Timeframe::M1).unwrap().unwrap();
        assert_eq!(snapshot.frame.len(), 3);
        assert_eq!(snapshot.filtered_rows, 1);

        // 전부 오래된 데이터면 원본 유지
        let old = Frame::from_bars(vec![Bar::new(
            1_000_000_000_000,
            dec!(1),
            dec!(1),
            dec!(1),
            dec!(1),
            dec!(1),
            1_000_000_059_999,
        )]);
        disk.save_bars("old", Timeframe::M1, &old).unwrap();
        assert_eq!(disk.load_bars("old", Timeframe::M1).unwrap().unwrap(), old);
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        let frame = recent_frame(2);
        disk.save_bars("ada", Timeframe::M1, &frame).unwrap();

        let path = disk.snapshot_path("ada", Timeframe::M1);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{\"open_time\": 12, \"open\":\n");
        fs::write(&path, content).unwrap();

        let snapshot = disk.load_snapshot("ada", Timeframe::M1).unwrap().unwrap();
        assert_eq!(snapshot.frame, frame);
        assert_eq!(snapshot.skipped_rows, 1);
    }

    #[test]
    fn test_legacy_array_and_columnar_documents() {
        let dir = tempfile::tempdir().unwrap();
        let disk = adapter(dir.path());
        let t = Timeframe::M1.bucket_start(Utc::now().timestamp_millis()) - 120_000;

        let array = format!(
            "[{{\"open_time\":{t},\"open\":1,\"high\":2,\"low\":1,\"close\":2,\"volume\":1}},\n {{\"open_time\":{},\"open\":2,\"high\":3,\"low\":2,\"close\":3,\"volume\":1}}]",
            t + 60_000
        );
        fs::write(disk.snapshot_path("a", Timeframe::M1), array).unwrap();
        let snapshot = disk.load_snapshot("a", Timeframe::M1).unwrap().unwrap();
        assert!(snapshot.legacy_format);
        assert_eq!(snapshot.frame.len(), 2);
        assert_eq!(snapshot.frame.bars()[0].close_time, t + 59_999);

        let columnar = format!(
            "{{\n  \"open_time\": [{t}, {}],\n  \"open\": [1, 2],\n  \"high\": [2, 3],\n  \"low\": [1, 2],\n  \"close\": [2, 3],\n  \"volume\": [1, 1],\n  \"is_closed\": [true, null]\n}}",
            t + 60_000
        );
        fs::write(disk.snapshot_path("b", Timeframe::M1), columnar).unwrap();
        let snapshot = disk.load_snapshot("b", Timeframe::M1).unwrap().unwrap();
        assert!(snapshot.legacy_format);
        assert_eq!(snapshot.frame.len(), 2);
        assert!(snapshot.frame.bars()[0].is_final());
        assert_eq!(snapshot.frame.bars()[1].is_closed, None);
    }

    #[test]
    fn test_concurrent_saves_of_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let disk = std::sync::Arc::new(adapter(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let disk = disk.clone();
                std::thread::spawn(move || {
                    let symbol = format!("s{}", i);
                    disk.save_bars(&symbol, Timeframe::M1, &recent_frame(4))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        for i in 0..8 {
            assert!(disk.exists(&format!("s{}", i), Timeframe::M1));
        }
    }
}
