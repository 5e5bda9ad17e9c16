use super::calculator::RecordCalculator;
use super::index::PriceIndex;
use super::matcher::Matcher;
use crate::error::{EngineError, Result};
use crate::formula::FormulaCache;
use crate::models::{
    BatchOptions, BatchStatistics, CalculatedRecord, Diagnostics, ErrorStrategy, NoMatchPolicy,
    Record, RunConfig,
};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Serialize, Serializer};
use std::time::Instant;

/// 进度通知 (每块一次)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// 已完成的块序号 (从 1 开始)
    pub chunk: usize,
    pub chunks: usize,
    pub message: String,
}

/// 进度观察者; 可在块之间请求取消
pub trait ProgressObserver {
    fn on_progress(&mut self, progress: &Progress);

    fn should_cancel(&self) -> bool {
        false
    }
}

impl<F: FnMut(&Progress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: &Progress) {
        self(progress)
    }
}

fn serialize_error<S: Serializer>(error: &EngineError, s: S) -> std::result::Result<S::Ok, S::Error> {
    error.report().serialize(s)
}

fn serialize_aborted<S: Serializer>(
    error: &Option<EngineError>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    error.as_ref().map(EngineError::report).serialize(s)
}

/// 失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchFailure {
    Record {
        usage_index: usize,
        #[serde(serialize_with = "serialize_error")]
        error: EngineError,
    },
    Chunk {
        chunk: usize,
        first_index: usize,
        len: usize,
        #[serde(serialize_with = "serialize_error")]
        error: EngineError,
    },
}

/// 批处理结果: 成功输出在前, 失败在后
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub outputs: Vec<CalculatedRecord>,
    pub failures: Vec<BatchFailure>,
    pub statistics: BatchStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
    /// StopAll 终止或取消时的原因; 之前完成的块仍在 outputs 中
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_aborted")]
    pub aborted: Option<EngineError>,
}

impl BatchOutcome {
    /// 全部记录成功
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_none()
    }
}

/// 单条记录的处置
enum Disposition {
    Emitted(Vec<CalculatedRecord>),
    Skipped,
}

/// 单块处理结果 (可能来自 rayon 工作线程)
struct ChunkReport {
    chunk: usize,
    first_index: usize,
    len: usize,
    outputs: Vec<CalculatedRecord>,
    failures: Vec<BatchFailure>,
    successes: usize,
    failed: usize,
    skipped: usize,
    chunk_failed: bool,
    fatal: Option<EngineError>,
    diagnostics: Option<Diagnostics>,
}

impl ChunkReport {
    fn new(chunk: usize, first_index: usize, len: usize) -> Self {
        Self {
            chunk,
            first_index,
            len,
            outputs: Vec::new(),
            failures: Vec::new(),
            successes: 0,
            failed: 0,
            skipped: 0,
            chunk_failed: false,
            fatal: None,
            diagnostics: None,
        }
    }

    /// 整块作废 (含已算出的部分结果)
    fn discard(&mut self, error: EngineError) {
        self.outputs.clear();
        self.successes = 0;
        self.skipped = 0;
        self.failed = self.len;
        self.chunk_failed = true;
        self.failures.push(BatchFailure::Chunk {
            chunk: self.chunk,
            first_index: self.first_index,
            len: self.len,
            error,
        });
    }
}

/// 批处理服务: 共享一个价格索引, 按块驱动匹配与计算
pub struct BatchProcessor<'r, 'a> {
    matcher: Matcher<'r, 'a>,
    calculator: RecordCalculator<'r>,
    no_match_policy: NoMatchPolicy,
    options: &'r BatchOptions,
}

impl<'r, 'a> BatchProcessor<'r, 'a> {
    pub fn new(
        index: &'r PriceIndex<'a>,
        config: &'r RunConfig,
        options: &'r BatchOptions,
        cache: &FormulaCache,
    ) -> Result<Self> {
        config.validate()?;
        options.validate()?;
        Ok(Self {
            matcher: Matcher::new(index, &config.matching),
            calculator: RecordCalculator::new(&config.matching, &config.calculation, &config.output, cache)?,
            no_match_policy: config.matching.no_match_policy,
            options,
        })
    }

    /// 匹配 + 计算单条记录, 并按 noMatchPolicy 处置未匹配 / 歧义
    fn process_record(
        &self,
        usage_index: usize,
        usage: &Record,
        mut diagnostics: Option<&mut Diagnostics>,
    ) -> Result<Disposition> {
        let result = self
            .matcher
            .match_record(usage_index, usage, diagnostics.as_deref_mut());

        if !result.is_matched() {
            match self.no_match_policy {
                NoMatchPolicy::Error => {
                    return Err(EngineError::Match {
                        usage_index,
                        outcome: result.outcome,
                        reason: result.reason,
                    });
                }
                NoMatchPolicy::Skip => return Ok(Disposition::Skipped),
                NoMatchPolicy::Include => {}
            }
        }

        self.calculator
            .calculate_all(usage_index, usage, &result, diagnostics)
            .map(Disposition::Emitted)
    }

    fn run_chunk(&self, chunk: usize, first_index: usize, records: &[Record]) -> ChunkReport {
        let mut report = ChunkReport::new(chunk, first_index, records.len());
        let mut diagnostics = self.options.diagnostics.then(Diagnostics::new);

        tracing::debug!("Chunk {} started: records {}..{}", chunk + 1, first_index, first_index + records.len());

        for (offset, usage) in records.iter().enumerate() {
            let usage_index = first_index + offset;
            match self.process_record(usage_index, usage, diagnostics.as_mut()) {
                Ok(Disposition::Emitted(outputs)) => {
                    report.successes += 1;
                    report.outputs.extend(outputs);
                }
                Ok(Disposition::Skipped) => report.skipped += 1,
                Err(error) if self.options.strategy == ErrorStrategy::ProcessIndividual => {
                    // 单条隔离: 失败记录不影响同块其他记录
                    tracing::warn!("Usage record {} failed: {}", usage_index, error);
                    report.failed += 1;
                    report.failures.push(BatchFailure::Record { usage_index, error });
                }
                Err(error) => {
                    tracing::warn!(
                        "Chunk {} failed at usage record {}: {} (strategy {:?})",
                        chunk + 1,
                        usage_index,
                        error,
                        self.options.strategy
                    );
                    if self.options.strategy == ErrorStrategy::StopAll {
                        report.fatal = Some(error.clone());
                    }
                    report.discard(error);
                    break;
                }
            }
        }

        report.diagnostics = diagnostics;
        report
    }

    /// 执行批处理; 输出顺序与不分块处理完全一致
    pub fn run(&self, usage: &[Record], observer: &mut dyn ProgressObserver) -> BatchOutcome {
        let started = Instant::now();
        let total = usage.len();
        let chunk_size = self.options.chunk_size.max(1);
        let chunks: Vec<&[Record]> = usage.chunks(chunk_size).collect();
        let chunk_count = chunks.len();

        tracing::info!(
            "Batch started: {} usage records, {} chunk(s) of {}, strategy={:?}, parallel={}",
            total,
            chunk_count,
            chunk_size,
            self.options.strategy,
            self.options.parallel
        );

        let mut outcome = BatchOutcome {
            outputs: Vec::with_capacity(total),
            failures: Vec::new(),
            statistics: BatchStatistics {
                total,
                chunks: chunk_count,
                started_at: Some(Utc::now()),
                ..BatchStatistics::default()
            },
            diagnostics: self.options.diagnostics.then(Diagnostics::new),
            aborted: None,
        };

        let reports: Box<dyn Iterator<Item = ChunkReport> + '_> = if self.options.parallel {
            // 各块线程内独立收集诊断, 按块顺序合并
            let computed: Vec<ChunkReport> = chunks
                .par_iter()
                .enumerate()
                .map(|(i, records)| self.run_chunk(i, i * chunk_size, records))
                .collect();
            Box::new(computed.into_iter())
        } else {
            Box::new(
                chunks
                    .iter()
                    .enumerate()
                    .map(move |(i, records)| self.run_chunk(i, i * chunk_size, records)),
            )
        };

        for report in reports {
            let chunk = report.chunk;
            if !absorb(&mut outcome, report, chunk_count, observer) {
                break;
            }
            // 只在块边界取消: 已完成的块完整保留, 下一块一条不留
            if chunk + 1 < chunk_count && observer.should_cancel() {
                tracing::warn!("Batch cancelled after chunk {}/{}", chunk + 1, chunk_count);
                outcome.aborted = Some(EngineError::Cancelled {
                    completed_chunks: chunk + 1,
                });
                break;
            }
        }

        outcome.statistics.elapsed_ms = started.elapsed().as_millis();
        if let Some(diag) = outcome.diagnostics.as_mut() {
            diag.statistics = outcome.statistics.clone();
            tracing::info!("Match success rate: {:.1}%", diag.match_success_rate() * 100.0);
        }

        let stats = &outcome.statistics;
        tracing::info!(
            "Batch finished: processed {}/{}, succeeded {}, failed {}, skipped {}, outputs {}, failed chunks {}, {} ms",
            stats.processed,
            stats.total,
            stats.successes,
            stats.failures,
            stats.skipped,
            outcome.outputs.len(),
            stats.failed_chunks,
            stats.elapsed_ms
        );
        outcome
    }
}

/// 合并一块结果; 返回 false 表示终止
fn absorb(
    outcome: &mut BatchOutcome,
    report: ChunkReport,
    chunk_count: usize,
    observer: &mut dyn ProgressObserver,
) -> bool {
    let stats = &mut outcome.statistics;
    stats.processed += report.len;
    stats.successes += report.successes;
    stats.failures += report.failed;
    stats.skipped += report.skipped;
    if report.chunk_failed {
        stats.failed_chunks += 1;
    }

    let progress = Progress {
        processed: stats.processed,
        total: stats.total,
        chunk: report.chunk + 1,
        chunks: chunk_count,
        message: format!(
            "进度: {}/{} 条, 块 {}/{}, 成功 {}, 失败 {}",
            stats.processed,
            stats.total,
            report.chunk + 1,
            chunk_count,
            stats.successes,
            stats.failures
        ),
    };

    outcome.outputs.extend(report.outputs);
    outcome.failures.extend(report.failures);
    if let (Some(all), Some(local)) = (outcome.diagnostics.as_mut(), report.diagnostics) {
        all.merge(local);
    }

    tracing::info!("{}", progress.message);
    observer.on_progress(&progress);

    if let Some(fatal) = report.fatal {
        tracing::error!("Batch aborted at chunk {}/{}: {}", report.chunk + 1, chunk_count, fatal);
        outcome.aborted = Some(fatal);
        return false;
    }
    true
}

/// 一次完整运行: 校验配置 -> 构建索引 -> 分块处理
///
/// 配置错误在处理任何记录之前返回 `Err`; 其余情况总是返回 `BatchOutcome`。
pub fn run_batch(
    usage: &[Record],
    catalog: &[Record],
    config: &RunConfig,
    options: &BatchOptions,
    cache: &FormulaCache,
    observer: &mut dyn ProgressObserver,
) -> Result<BatchOutcome> {
    config.validate()?;
    options.validate()?;

    let index = PriceIndex::build(catalog, &config.matching);
    tracing::info!(
        "Price index ready: {} catalog items, {} indexed, {} excluded",
        index.catalog_len(),
        index.indexed_count(),
        index.excluded_count()
    );
    let processor = BatchProcessor::new(&index, config, options, cache)?;
    Ok(processor.run(usage, observer))
}
