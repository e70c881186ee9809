//! 멀티 스트림
//!
//! 독립 스트림 N개를 각자 스레드에서 돌린다. 스트림마다 자기 `TransferStats`를 갖고
//! 끝나면 결과 채널로 보고한다. 합산은 호출자가 `aggregate`로 한다.

use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, warn};

use crate::stats::TransferStats;
use crate::{Error, Result};

/// 스트림 하나의 결과
#[derive(Debug)]
pub struct StreamResult {
    /// 스트림 번호 (0부터)
    pub index: usize,

    pub outcome: Result<TransferStats>,
}

/// 합산 결과
#[derive(Debug, Default)]
pub struct StreamSummary {
    /// 성공한 스트림 통계 합
    pub stats: TransferStats,

    pub succeeded: usize,

    /// 실패한 스트림과 에러
    pub failures: Vec<(usize, Error)>,
}

impl StreamSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// `count`개 스트림을 병렬 실행, 번호 순으로 정렬된 결과 반환
pub fn run_streams<F>(count: usize, job: F) -> Vec<StreamResult>
where
    F: Fn(usize) -> Result<TransferStats> + Sync,
{
    let (tx, rx) = bounded(count.max(1));

    thread::scope(|scope| {
        for index in 0..count {
            let tx = tx.clone();
            let job = &job;
            scope.spawn(move || {
                let outcome = job(index);
                debug!("스트림 {} 종료 (ok={})", index, outcome.is_ok());
                // 수신측은 scope가 끝날 때까지 살아 있다
                let _ = tx.send(StreamResult { index, outcome });
            });
        }
    });
    drop(tx);

    let mut results: Vec<StreamResult> = rx.iter().collect();
    results.sort_by_key(|r| r.index);
    results
}

/// 성공한 스트림 통계를 합산
pub fn aggregate(results: Vec<StreamResult>) -> StreamSummary {
    let mut summary = StreamSummary::default();
    for result in results {
        match result.outcome {
            Ok(stats) => {
                summary.stats.merge(&stats);
                summary.succeeded += 1;
            }
            Err(e) => {
                warn!("스트림 {} 실패: {}", result.index, e);
                summary.failures.push((result.index, e));
            }
        }
    }
    summary
}
