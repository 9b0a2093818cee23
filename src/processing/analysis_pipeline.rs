//! 分析管线
//!
//! 单线程 actor：按 FIFO 逐个执行分析任务，每个任务拆成 30 秒一块的 `step()`，
//! 块与块之间排空请求通道，使取消和新任务及时可见。
//! 每个任务输出时长，可选声学指纹和 EBU R128 响度。

use super::{PipelineResources, open_stream};
use super::protocol::{
    AnalysisEvent, AnalysisEventKind, AnalysisRequest, AnalysisResult, AudioSource, ErrorReport,
};
use crate::audio::{
    ByteWindow, ChannelMixer, CodecDecoder, CodecName, DecodedBuffer, DecoderRegistry, Lease,
    Resampler, ResamplerKey, ScratchBuffers, ScratchRole, StreamMetadata,
};
use crate::core::{Fingerprinter, LoudnessConfig, LoudnessMeter};
use crate::error::{AudioError, AudioResult, ErrorCategory};
use crate::tools::constants::{analysis, fingerprint, mp3};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[cfg(debug_assertions)]
macro_rules! debug_pipeline {
    ($($arg:tt)*) => {
        tracing::debug!(target: "analysis_pipeline", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_pipeline {
    ($($arg:tt)*) => {};
}

/// 分析管线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// 每个 step 解码的秒数
    pub chunk_seconds: u32,
    /// 排队任务上限（不含正在执行的任务）
    pub max_queued_jobs: usize,
    /// 超过该时长只返回时长
    pub max_analyze_seconds: f64,
    /// 超过该数据量只返回时长
    pub max_analyze_bytes: u64,
    /// 进度超过该比例后发送一次剩余时间估计
    pub estimate_after_progress: f64,
    /// actor 占用单核的比例上限；块与块之间按此让出 CPU，1.0 表示不让出
    pub max_cpu_utilization: f64,
    pub loudness: LoudnessConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: analysis::CHUNK_SECONDS,
            max_queued_jobs: analysis::MAX_QUEUED_JOBS,
            max_analyze_seconds: analysis::MAX_ANALYZE_SECONDS,
            max_analyze_bytes: analysis::MAX_ANALYZE_BYTES,
            estimate_after_progress: analysis::ESTIMATE_AFTER_PROGRESS,
            max_cpu_utilization: analysis::MAX_CPU_UTILIZATION,
            loudness: LoudnessConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// 忙碌 `busy` 之后应空闲的时长：busy / 利用率 - busy
    pub fn downtime_after(&self, busy: Duration) -> Duration {
        let utilization = self.max_cpu_utilization;
        if !(utilization > 0.0 && utilization < 1.0) {
            return Duration::ZERO;
        }
        busy.div_f64(utilization).saturating_sub(busy)
    }
}

/// 分析任务的输入
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub id: u64,
    pub source: AudioSource,
    pub want_fingerprint: bool,
    pub want_loudness: bool,
}

/// `step()` 之后的任务状态
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Running {
        progress: f64,
        /// 仅在首次越过估计阈值时给出
        estimate_ms: Option<u64>,
    },
    Finished(AnalysisResult),
}

/// `prepare()` 的结果：要么得到待执行的任务，要么不必解码就能给出结果
pub enum JobStart {
    Job(Box<AnalysisJob>),
    Immediate(AnalysisResult),
}

/// 正在执行的分析任务；drop 时归还所有租借的实例
pub struct AnalysisJob {
    id: u64,
    config: AnalysisConfig,
    window: ByteWindow,
    metadata: StreamMetadata,
    decoder: Lease<CodecName, Box<dyn CodecDecoder>>,
    resampler: Option<Lease<ResamplerKey, Resampler>>,
    mixer: ChannelMixer,
    scratch: ScratchBuffers,
    fingerprinter: Option<Fingerprinter>,
    meter: Option<LoudnessMeter>,
    offset: u64,
    samples_decoded: u64,
    started_at: Instant,
    estimate_sent: bool,
    finished: bool,
}

impl AnalysisJob {
    /// 嗅探、解复用并租借资源
    pub fn prepare(
        request: &JobRequest,
        resources: &PipelineResources,
        config: &AnalysisConfig,
    ) -> AudioResult<JobStart> {
        let mut window = request.source.open()?;
        let (codec, metadata) = open_stream(
            &mut window,
            request.source.file_name(),
            resources.registry(),
        )?;
        let duration = metadata.duration_seconds;

        let data_bytes = metadata.data_end.saturating_sub(metadata.data_start);
        if duration > config.max_analyze_seconds || data_bytes > config.max_analyze_bytes {
            tracing::warn!(
                "{} 过长（{duration:.0} 秒，{data_bytes} 字节），只返回时长",
                request.source.display_name()
            );
            return Ok(JobStart::Immediate(AnalysisResult {
                duration,
                fingerprint: None,
                loudness: None,
            }));
        }

        let want_fingerprint =
            request.want_fingerprint && duration >= fingerprint::MIN_DURATION_SECONDS as f64;
        if !want_fingerprint && !request.want_loudness {
            return Ok(JobStart::Immediate(AnalysisResult {
                duration,
                fingerprint: None,
                loudness: None,
            }));
        }

        let sample_rate = metadata.sample_rate;
        let mut decoder = resources.lease_decoder(codec)?;
        decoder.set_target_buffer_frames((sample_rate * config.chunk_seconds.max(1)) as usize);
        decoder.start(&metadata)?;

        let resampler = if want_fingerprint && sample_rate != fingerprint::SAMPLE_RATE {
            let key = ResamplerKey {
                channels: 1,
                in_rate: sample_rate,
                out_rate: fingerprint::SAMPLE_RATE,
                quality: fingerprint::RESAMPLER_QUALITY,
            };
            Some(resources.lease_resampler(key)?)
        } else {
            None
        };

        let meter = if request.want_loudness {
            Some(LoudnessMeter::new(
                metadata.channel_count.max(1) as usize,
                sample_rate,
                config.loudness,
            )?)
        } else {
            None
        };

        debug_pipeline!(
            "任务 {} 就绪: codec={codec} sr={sample_rate} duration={duration:.2}s fingerprint={want_fingerprint}",
            request.id
        );

        Ok(JobStart::Job(Box::new(Self {
            id: request.id,
            config: config.clone(),
            offset: metadata.data_start,
            window,
            metadata,
            decoder,
            resampler,
            mixer: ChannelMixer::new(1)?,
            scratch: ScratchBuffers::new(),
            fingerprinter: want_fingerprint.then(Fingerprinter::new),
            meter,
            samples_decoded: 0,
            started_at: Instant::now(),
            estimate_sent: false,
            finished: false,
        })))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    /// 已处理字节占数据区的比例
    pub fn progress(&self) -> f64 {
        let span = self.metadata.data_end.saturating_sub(self.metadata.data_start);
        if span == 0 {
            return 1.0;
        }
        let done = self.offset.saturating_sub(self.metadata.data_start);
        (done as f64 / span as f64).clamp(0.0, 1.0)
    }

    /// 解码并处理一块
    pub fn step(&mut self) -> AudioResult<JobState> {
        if self.finished {
            return Err(AudioError::InvalidInput(format!("任务 {} 已结束", self.id)));
        }

        let data_end = self.metadata.data_end;
        if self.offset < data_end && !self.decoder.has_reached_end() {
            let chunk_bytes = ((self.metadata.max_bytes_per_sample
                * self.metadata.sample_rate as f64
                * self.config.chunk_seconds.max(1) as f64)
                .ceil() as u64)
                .max(2 * mp3::MAX_FRAME_BYTES as u64);
            let block = self.window.read_block_of_size_at(
                chunk_bytes,
                self.offset,
                analysis::READ_PADDING_FACTOR,
            )?;
            let usable = block.len().min((data_end - self.offset) as usize);
            let step = self
                .decoder
                .decode_until_flush(&block[..usable], self.offset)?;

            let advanced = step.consumed_until > self.offset;
            self.offset = self.offset.max(step.consumed_until);
            let flushed = step.flushed.is_some();
            if let Some(buffer) = step.flushed {
                self.consume(&buffer)?;
            }

            let tail = (self.metadata.max_bytes_per_sample
                * self.metadata.samples_per_frame as f64
                * 10.0) as u64;
            let remaining = data_end.saturating_sub(self.offset);
            if flushed || (advanced && remaining > tail) {
                return Ok(self.running());
            }
        }

        self.finish().map(JobState::Finished)
    }

    fn running(&mut self) -> JobState {
        let progress = self.progress();
        let mut estimate_ms = None;
        if !self.estimate_sent && progress > self.config.estimate_after_progress {
            self.estimate_sent = true;
            let elapsed = self.started_at.elapsed().as_secs_f64();
            let remaining = (elapsed / progress - elapsed).max(0.0);
            estimate_ms = Some((remaining * 1000.0).round() as u64);
        }
        JobState::Running {
            progress,
            estimate_ms,
        }
    }

    fn consume(&mut self, buffer: &DecodedBuffer) -> AudioResult<()> {
        let length = buffer.length;
        if length == 0 {
            return Ok(());
        }
        self.samples_decoded += length as u64;

        if let Some(fp) = self.fingerprinter.as_mut()
            && fp.needs_samples()
        {
            let mono = self.scratch.planar(ScratchRole::Fingerprint, 1, length);
            self.mixer.mix_into(&buffer.channels, length, mono);
            match self.resampler.as_mut() {
                Some(resampler) => {
                    let resampled = resampler.resample(mono, length)?;
                    fp.feed(&resampled[0])?;
                }
                None => {
                    fp.feed(&mono[0][..length])?;
                }
            }
        }

        if let Some(meter) = self.meter.as_mut() {
            meter.add_frames(&buffer.channels, length)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> AudioResult<AnalysisResult> {
        self.finished = true;
        if let Some(rest) = self.decoder.end() {
            self.consume(&rest)?;
        }

        let fingerprint = match &self.fingerprinter {
            Some(fp) if fp.can_calculate() => Some(fp.calculate()?),
            _ => None,
        };
        let loudness = self.meter.as_ref().map(LoudnessMeter::result);

        debug_pipeline!(
            "任务 {} 完成: 解码 {} 样本，用时 {:.2?}",
            self.id,
            self.samples_decoded,
            self.started_at.elapsed()
        );

        Ok(AnalysisResult {
            duration: self.metadata.duration_seconds,
            fingerprint,
            loudness,
        })
    }
}

/// 不经过 actor，在当前线程跑完一个任务
pub fn analyze_source(
    request: &JobRequest,
    resources: &PipelineResources,
    config: &AnalysisConfig,
) -> AudioResult<AnalysisResult> {
    match AnalysisJob::prepare(request, resources, config)? {
        JobStart::Immediate(result) => Ok(result),
        JobStart::Job(mut job) => loop {
            if let JobState::Finished(result) = job.step()? {
                return Ok(result);
            }
        },
    }
}

// ==================== actor ====================

struct RunningJob {
    job: Box<AnalysisJob>,
    abort_requested: bool,
}

/// 分析 actor 本体；由 `spawn` 在专用线程上构造并运行
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    resources: PipelineResources,
    requests: Receiver<AnalysisRequest>,
    events: Sender<AnalysisEvent>,
    queue: VecDeque<JobRequest>,
    current: Option<RunningJob>,
    /// 当前任务下一块最早的开始时间
    resume_at: Option<Instant>,
    shutting_down: bool,
}

impl AnalysisPipeline {
    pub fn new(
        config: AnalysisConfig,
        registry: DecoderRegistry,
        requests: Receiver<AnalysisRequest>,
        events: Sender<AnalysisEvent>,
    ) -> Self {
        Self {
            config,
            resources: PipelineResources::new(registry),
            requests,
            events,
            queue: VecDeque::new(),
            current: None,
            resume_at: None,
            shutting_down: false,
        }
    }

    /// 在新线程上启动 actor
    pub fn spawn(config: AnalysisConfig, registry: DecoderRegistry) -> AudioResult<AnalysisHandle> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("analysis-actor".into())
            .spawn(move || Self::new(config, registry, request_rx, event_tx).run())?;
        Ok(AnalysisHandle {
            requests: request_tx,
            events: event_rx,
            thread: Some(thread),
        })
    }

    /// 消息循环；请求通道关闭且无剩余任务，或收到 Shutdown 时返回
    pub fn run(mut self) {
        loop {
            if self.current.is_none() && self.queue.is_empty() && !self.shutting_down {
                match self.requests.recv() {
                    Ok(request) => self.handle(request),
                    Err(_) => break,
                }
            }
            while let Ok(request) = self.requests.try_recv() {
                self.handle(request);
            }

            if self.shutting_down {
                self.abort_everything();
                break;
            }

            if self.current.is_none() {
                self.start_next();
            } else if !self.wait_downtime() {
                self.step_current();
            }
        }
        debug_pipeline!("分析 actor 退出");
    }

    fn emit(&self, id: u64, kind: AnalysisEventKind) {
        if self.events.send(AnalysisEvent::new(id, kind)).is_err() {
            debug_pipeline!("事件接收端已关闭，丢弃任务 {id} 的事件");
        }
    }

    fn handle(&mut self, request: AnalysisRequest) {
        match request {
            AnalysisRequest::Analyze {
                id,
                source,
                want_fingerprint,
                want_loudness,
            } => {
                if self.queue.len() >= self.config.max_queued_jobs {
                    tracing::warn!("分析队列已满，拒绝任务 {id}");
                    self.emit(
                        id,
                        AnalysisEventKind::Error(ErrorReport::new(
                            ErrorCategory::Resource,
                            format!("分析队列已满（上限 {}）", self.config.max_queued_jobs),
                        )),
                    );
                    return;
                }
                self.queue.push_back(JobRequest {
                    id,
                    source,
                    want_fingerprint,
                    want_loudness,
                });
            }
            AnalysisRequest::Abort { id } => {
                if let Some(running) = self.current.as_mut()
                    && running.job.id() == id
                {
                    running.abort_requested = true;
                } else if let Some(pos) = self.queue.iter().position(|j| j.id == id) {
                    self.queue.remove(pos);
                    self.emit(id, AnalysisEventKind::Abort);
                } else {
                    debug_pipeline!("取消请求 {id} 没有匹配的任务");
                }
            }
            AnalysisRequest::Shutdown => self.shutting_down = true,
        }
    }

    /// 块间让出 CPU；等待期间收到请求时处理它并返回 true
    fn wait_downtime(&mut self) -> bool {
        let Some(until) = self.resume_at else {
            return false;
        };
        let now = Instant::now();
        if until > now {
            match self.requests.recv_timeout(until - now) {
                Ok(request) => {
                    self.handle(request);
                    return true;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
            }
        }
        self.resume_at = None;
        false
    }

    fn start_next(&mut self) {
        self.resume_at = None;
        let Some(request) = self.queue.pop_front() else {
            return;
        };
        match AnalysisJob::prepare(&request, &self.resources, &self.config) {
            Ok(JobStart::Job(job)) => {
                self.current = Some(RunningJob {
                    job,
                    abort_requested: false,
                });
            }
            Ok(JobStart::Immediate(result)) => {
                self.emit(request.id, AnalysisEventKind::Result(result));
            }
            Err(e) => {
                tracing::warn!("任务 {} 失败: {e}", request.id);
                self.emit(request.id, AnalysisEventKind::Error(ErrorReport::from(&e)));
            }
        }
    }

    fn step_current(&mut self) {
        let Some(mut running) = self.current.take() else {
            return;
        };
        let id = running.job.id();
        if running.abort_requested {
            drop(running);
            self.emit(id, AnalysisEventKind::Abort);
            return;
        }

        let started = Instant::now();
        match running.job.step() {
            Ok(JobState::Running {
                progress,
                estimate_ms,
            }) => {
                self.resume_at = Some(Instant::now() + self.config.downtime_after(started.elapsed()));
                self.emit(id, AnalysisEventKind::Progress(progress));
                if let Some(ms) = estimate_ms {
                    self.emit(id, AnalysisEventKind::Estimate(ms));
                }
                self.current = Some(running);
            }
            Ok(JobState::Finished(result)) => {
                drop(running);
                self.emit(id, AnalysisEventKind::Progress(1.0));
                self.emit(id, AnalysisEventKind::Result(result));
            }
            Err(e) => {
                drop(running);
                tracing::warn!("任务 {id} 失败: {e}");
                self.emit(id, AnalysisEventKind::Error(ErrorReport::from(&e)));
            }
        }
    }

    fn abort_everything(&mut self) {
        if let Some(running) = self.current.take() {
            let id = running.job.id();
            drop(running);
            self.emit(id, AnalysisEventKind::Abort);
        }
        while let Some(request) = self.queue.pop_front() {
            self.emit(request.id, AnalysisEventKind::Abort);
        }
    }
}

/// 调用方持有的 actor 句柄；drop 时关闭 actor 并等待线程退出
pub struct AnalysisHandle {
    requests: Sender<AnalysisRequest>,
    events: Receiver<AnalysisEvent>,
    thread: Option<JoinHandle<()>>,
}

impl AnalysisHandle {
    pub fn send(&self, request: AnalysisRequest) -> AudioResult<()> {
        self.requests
            .send(request)
            .map_err(|_| AudioError::InvalidInput("分析 actor 已退出".into()))
    }

    pub fn submit(
        &self,
        id: u64,
        source: AudioSource,
        want_fingerprint: bool,
        want_loudness: bool,
    ) -> AudioResult<()> {
        self.send(AnalysisRequest::Analyze {
            id,
            source,
            want_fingerprint,
            want_loudness,
        })
    }

    pub fn abort(&self, id: u64) -> AudioResult<()> {
        self.send(AnalysisRequest::Abort { id })
    }

    pub fn events(&self) -> &Receiver<AnalysisEvent> {
        &self.events
    }

    /// 收集事件直到 `id` 的终止事件出现
    pub fn wait_for(&self, id: u64) -> AudioResult<Vec<AnalysisEvent>> {
        let mut collected = Vec::new();
        loop {
            let event = self
                .events
                .recv()
                .map_err(|_| AudioError::InvalidInput("分析 actor 已退出".into()))?;
            let done = event.id == id && event.is_terminal();
            collected.push(event);
            if done {
                return Ok(collected);
            }
        }
    }

    pub fn shutdown(mut self) -> AudioResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> AudioResult<()> {
        let _ = self.requests.send(AnalysisRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| AudioError::InvalidInput("分析 actor 线程 panic".into()))?;
        }
        Ok(())
    }
}

impl Drop for AnalysisHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("关闭分析 actor 失败: {e}");
        }
    }
}
