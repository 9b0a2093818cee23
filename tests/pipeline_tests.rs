//! 分析管线与播放管线集成测试
//!
//! 覆盖单线程直接分析、actor 事件顺序、取消与关闭，以及播放缓冲、定位和重采样输出。

mod mp3_test_fixtures;

use mp3_stream_engine::audio::{
    CodecDecoder, CodecName, DecodeStep, DecodedBuffer, DecoderRegistry, Reusable, SeekResult,
    StreamMetadata,
};
use mp3_stream_engine::error::{AudioError, AudioResult, ErrorCategory};
use mp3_stream_engine::processing::{
    AnalysisConfig, AnalysisEvent, AnalysisEventKind, AnalysisPipeline, AnalysisRequest,
    AudioSource, JobRequest, PipelineResources, PlaybackConfig, PlaybackPipeline, PlaybackRequest,
    PlaybackResponse, analyze_source,
};
use mp3_test_fixtures::*;
use std::collections::HashMap;
use std::sync::Arc;

/// 约 10.4 秒
fn ten_seconds() -> AudioSource {
    AudioSource::memory(Some("ten.mp3".into()), silent_cbr(400))
}

/// 约 60 秒
fn one_minute() -> AudioSource {
    AudioSource::memory(Some("minute.mp3".into()), silent_cbr(2300))
}

fn request(id: u64, source: AudioSource, fingerprint: bool, loudness: bool) -> JobRequest {
    JobRequest {
        id,
        source,
        want_fingerprint: fingerprint,
        want_loudness: loudness,
    }
}

fn small_chunks() -> AnalysisConfig {
    AnalysisConfig {
        chunk_seconds: 1,
        ..AnalysisConfig::default()
    }
}

// ============================================================================
// 直接分析
// ============================================================================

#[test]
fn test_analyze_silence_full() {
    let resources = PipelineResources::new(DecoderRegistry::default());
    let result = analyze_source(
        &request(1, ten_seconds(), true, true),
        &resources,
        &AnalysisConfig::default(),
    )
    .unwrap();

    log(
        format!("时长 {:.3}s, 指纹 {:?}", result.duration, result.fingerprint.as_ref().map(String::len)),
        format!("duration {:.3}s, fingerprint {:?}", result.duration, result.fingerprint.as_ref().map(String::len)),
    );
    assert!((result.duration - 10.449).abs() < 0.01);
    assert!(result.fingerprint.as_ref().is_some_and(|f| !f.is_empty()));

    let loudness = result.loudness.expect("要求了响度");
    assert_eq!(loudness.integrated_lufs, None);
    assert_eq!(loudness.track_gain_db, None);
    assert!(loudness.true_peak < 1e-5);
    assert!(loudness.begin_silence_seconds > 9.0);
    assert_eq!(loudness.begin_silence_seconds, loudness.end_silence_seconds);
}

#[test]
fn test_fingerprint_is_deterministic() {
    let resources = PipelineResources::new(DecoderRegistry::default());
    let config = AnalysisConfig::default();
    let a = analyze_source(&request(1, ten_seconds(), true, false), &resources, &config).unwrap();
    // 第二次使用池中归还的解码器和重采样器
    let b = analyze_source(&request(2, ten_seconds(), true, false), &resources, &config).unwrap();
    assert!(a.fingerprint.is_some());
    assert_eq!(a.fingerprint, b.fingerprint);
    assert!(a.loudness.is_none());
}

#[test]
fn test_short_track_skips_fingerprint() {
    let resources = PipelineResources::new(DecoderRegistry::default());
    let source = AudioSource::memory(None, silent_cbr(200));
    let result = analyze_source(
        &request(1, source, true, true),
        &resources,
        &AnalysisConfig::default(),
    )
    .unwrap();
    assert!(result.duration < 7.0);
    assert_eq!(result.fingerprint, None);
    assert!(result.loudness.is_some());
}

#[test]
fn test_duration_only_results() {
    let resources = PipelineResources::new(DecoderRegistry::default());

    let nothing_wanted = analyze_source(
        &request(1, ten_seconds(), false, false),
        &resources,
        &AnalysisConfig::default(),
    )
    .unwrap();
    assert!(nothing_wanted.duration > 10.0);
    assert!(nothing_wanted.fingerprint.is_none() && nothing_wanted.loudness.is_none());

    let too_long = AnalysisConfig {
        max_analyze_seconds: 5.0,
        ..AnalysisConfig::default()
    };
    let result =
        analyze_source(&request(2, ten_seconds(), true, true), &resources, &too_long).unwrap();
    assert!(result.duration > 10.0);
    assert!(result.fingerprint.is_none() && result.loudness.is_none());
}

#[test]
fn test_chunked_analysis_matches_single_chunk() {
    let resources = PipelineResources::new(DecoderRegistry::default());
    let whole = analyze_source(
        &request(1, ten_seconds(), true, true),
        &resources,
        &AnalysisConfig::default(),
    )
    .unwrap();
    let chunked =
        analyze_source(&request(2, ten_seconds(), true, true), &resources, &small_chunks()).unwrap();

    assert_eq!(whole.duration, chunked.duration);
    let (a, b) = (whole.loudness.unwrap(), chunked.loudness.unwrap());
    assert!((a.begin_silence_seconds - b.begin_silence_seconds).abs() < 1e-9);
}

#[test]
fn test_riff_wrapped_file_on_disk() {
    let stream = silent_cbr(400);
    let data = riff_wrapped(&stream, 400 * SAMPLES_PER_FRAME as u32, 576);
    let path = write_fixture("riff_wrapped.wav", &data);

    let resources = PipelineResources::new(DecoderRegistry::default());
    let result = analyze_source(
        &request(1, AudioSource::file(&path), false, true),
        &resources,
        &AnalysisConfig::default(),
    )
    .unwrap();
    assert!((result.duration - 400.0 * 1152.0 / 44100.0).abs() < 1e-9);
    assert!(result.loudness.is_some());
}

// ============================================================================
// 分析 actor
// ============================================================================

fn kinds(events: &[AnalysisEvent], id: u64) -> Vec<&AnalysisEventKind> {
    events.iter().filter(|e| e.id == id).map(|e| &e.kind).collect()
}

#[test]
fn test_actor_progress_then_result() {
    let handle = AnalysisPipeline::spawn(small_chunks(), DecoderRegistry::default()).unwrap();
    handle.submit(7, ten_seconds(), true, true).unwrap();
    let events = handle.wait_for(7).unwrap();
    let kinds = kinds(&events, 7);

    log(
        format!("任务 7 共 {} 个事件", kinds.len()),
        format!("job 7 produced {} events", kinds.len()),
    );
    assert!(matches!(kinds.last(), Some(AnalysisEventKind::Result(_))));
    assert!(matches!(kinds[kinds.len() - 2], AnalysisEventKind::Progress(p) if *p == 1.0));

    let progress: Vec<f64> = kinds
        .iter()
        .filter_map(|k| match k {
            AnalysisEventKind::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.len() > 2);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));

    let estimates = kinds
        .iter()
        .filter(|k| matches!(k, AnalysisEventKind::Estimate(_)))
        .count();
    assert!(estimates <= 1);

    handle.shutdown().unwrap();
}

#[test]
fn test_actor_runs_jobs_in_order() {
    let handle = AnalysisPipeline::spawn(small_chunks(), DecoderRegistry::default()).unwrap();
    handle.submit(1, ten_seconds(), false, true).unwrap();
    handle.submit(2, ten_seconds(), false, true).unwrap();
    let events = handle.wait_for(2).unwrap();

    let first_terminal = events.iter().position(|e| e.id == 1 && e.is_terminal());
    let second_start = events.iter().position(|e| e.id == 2);
    assert!(first_terminal.is_some());
    assert!(first_terminal < second_start);
    handle.shutdown().unwrap();
}

#[test]
fn test_abort_running_job() {
    let handle = AnalysisPipeline::spawn(small_chunks(), DecoderRegistry::default()).unwrap();
    handle.submit(1, one_minute(), true, true).unwrap();

    let first = handle.events().recv().unwrap();
    assert_eq!(first.id, 1);
    assert!(!first.is_terminal());
    handle.abort(1).unwrap();

    let events = handle.wait_for(1).unwrap();
    assert!(matches!(events.last().map(|e| &e.kind), Some(AnalysisEventKind::Abort)));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e.kind, AnalysisEventKind::Result(_)))
    );
    handle.shutdown().unwrap();
}

#[test]
fn test_throttled_actor_still_sees_abort() {
    // 利用率 1%：每块之后空闲约 99 倍的解码耗时，取消应在空闲期间被处理
    let config = AnalysisConfig {
        max_cpu_utilization: 0.01,
        ..small_chunks()
    };
    let handle = AnalysisPipeline::spawn(config, DecoderRegistry::default()).unwrap();
    handle.submit(1, one_minute(), false, true).unwrap();

    let first = handle.events().recv().unwrap();
    assert!(matches!(first.kind, AnalysisEventKind::Progress(_)));
    handle.abort(1).unwrap();

    let events = handle.wait_for(1).unwrap();
    let progress = events
        .iter()
        .filter(|e| matches!(e.kind, AnalysisEventKind::Progress(_)))
        .count();
    log(
        format!("取消前额外进度事件 {progress} 个"),
        format!("{progress} extra progress events before abort"),
    );
    assert!(matches!(events.last().map(|e| &e.kind), Some(AnalysisEventKind::Abort)));
    assert!(progress <= 2);
    handle.shutdown().unwrap();
}

#[test]
fn test_abort_queued_job() {
    let handle = AnalysisPipeline::spawn(small_chunks(), DecoderRegistry::default()).unwrap();
    handle.submit(1, one_minute(), false, true).unwrap();
    handle.submit(2, ten_seconds(), true, true).unwrap();
    handle.abort(2).unwrap();

    let events = handle.wait_for(2).unwrap();
    assert_eq!(kinds(&events, 2), vec![&AnalysisEventKind::Abort]);
    handle.shutdown().unwrap();
}

#[test]
fn test_full_queue_rejects_with_resource_error() {
    let config = AnalysisConfig {
        max_queued_jobs: 0,
        ..small_chunks()
    };
    let handle = AnalysisPipeline::spawn(config, DecoderRegistry::default()).unwrap();
    handle.submit(9, ten_seconds(), true, true).unwrap();
    let events = handle.wait_for(9).unwrap();
    match &events.last().unwrap().kind {
        AnalysisEventKind::Error(report) => assert_eq!(report.category, ErrorCategory::Resource),
        other => panic!("unexpected event {other:?}"),
    }
    handle.shutdown().unwrap();
}

#[test]
fn test_shutdown_terminates_every_job() {
    let handle = AnalysisPipeline::spawn(small_chunks(), DecoderRegistry::default()).unwrap();
    for id in 1..=3 {
        handle.submit(id, one_minute(), true, true).unwrap();
    }
    handle.send(AnalysisRequest::Shutdown).unwrap();

    let mut terminals: HashMap<u64, usize> = HashMap::new();
    while let Ok(event) = handle.events().recv() {
        if event.is_terminal() {
            *terminals.entry(event.id).or_default() += 1;
        }
    }
    log(
        format!("终止事件: {terminals:?}"),
        format!("terminal events: {terminals:?}"),
    );
    for id in 1..=3 {
        assert_eq!(terminals.get(&id), Some(&1), "任务 {id} 应恰好终止一次");
    }
}

// ============================================================================
// 播放管线
// ============================================================================

#[test]
fn test_playback_buffers_cover_whole_track() {
    let mut pipeline =
        PlaybackPipeline::new(PlaybackConfig::default(), DecoderRegistry::default()).unwrap();
    let meta = pipeline.load_track(&ten_seconds()).unwrap();
    assert_eq!(meta.sample_rate, 44_100);

    let first = pipeline.fill_buffers(2).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].length, 22_050);
    assert_eq!(first[0].channels.len(), 2);
    assert_eq!(first[0].start_time, 0.0);
    assert!((first[1].start_time - 0.5).abs() < 1e-9);
    assert!((first[0].end_time - first[1].start_time).abs() < 1e-9);

    let mut total: u64 = first.iter().map(|b| b.length as u64).sum();
    loop {
        let buffers = pipeline.fill_buffers(4).unwrap();
        if buffers.is_empty() {
            break;
        }
        total += buffers.iter().map(|b| b.length as u64).sum::<u64>();
    }
    log(
        format!("共输出 {total} 个样本"),
        format!("{total} frames emitted"),
    );
    assert_eq!(total, decoded_samples(400));
    assert!(pipeline.is_finished());
}

#[test]
fn test_playback_seek_sets_base_time() {
    let mut pipeline =
        PlaybackPipeline::new(PlaybackConfig::default(), DecoderRegistry::default()).unwrap();
    pipeline.load_track(&ten_seconds()).unwrap();
    pipeline.fill_buffers(1).unwrap();

    let (buffers, base) = pipeline.seek(5.0, 2).unwrap();
    log(format!("定位后起点 {base:.4}s"), format!("seek landed at {base:.4}s"));
    assert!(base <= 5.0 && 5.0 - base < 0.05);
    assert_eq!(buffers.len(), 2);
    assert_eq!(buffers[0].start_time, base);
    assert_eq!(buffers[0].length, 22_050);

    // 定位回开头后重新输出编码器延迟之后的全部样本
    let (again, base) = pipeline.seek(0.0, 1).unwrap();
    assert_eq!(base, 0.0);
    assert_eq!(again[0].start_time, 0.0);
}

#[test]
fn test_playback_resamples_and_mixes() {
    let config = PlaybackConfig {
        output_sample_rate: 48_000,
        output_channels: 1,
        ..PlaybackConfig::default()
    };
    let mut pipeline = PlaybackPipeline::new(config, DecoderRegistry::default()).unwrap();
    pipeline.load_track(&ten_seconds()).unwrap();

    let buffers = pipeline.fill_buffers(3).unwrap();
    assert_eq!(buffers.len(), 3);
    for buffer in &buffers {
        assert_eq!(buffer.channels.len(), 1);
        assert_eq!(buffer.length, 24_000);
        assert!(buffer.channels[0].iter().all(|s| s.abs() < 1e-4));
    }
    assert!((buffers[2].start_time - 1.0).abs() < 1e-9);

    // 定位时重采样器重启
    let (after_seek, _) = pipeline.seek(3.0, 1).unwrap();
    assert_eq!(after_seek[0].length, 24_000);
}

#[test]
fn test_playback_actor_round_trip() {
    let path = write_fixture("playback_actor.mp3", &silent_cbr(400));
    let handle = PlaybackPipeline::spawn(PlaybackConfig::default(), DecoderRegistry::default())
        .unwrap();

    match handle
        .request(PlaybackRequest::LoadTrack {
            source: AudioSource::file(&path),
        })
        .unwrap()
    {
        PlaybackResponse::Loaded(summary) => {
            assert_eq!(summary.sample_rate, 44_100);
            assert_eq!(summary.channel_count, 2);
            assert!(!summary.is_vbr);
        }
        other => panic!("unexpected response {other:?}"),
    }

    match handle
        .request(PlaybackRequest::FillBuffers { count: 2 })
        .unwrap()
    {
        PlaybackResponse::Buffers { buffers, base_time } => {
            assert_eq!(buffers.len(), 2);
            assert_eq!(base_time, None);
        }
        other => panic!("unexpected response {other:?}"),
    }

    match handle
        .request(PlaybackRequest::Seek {
            time: 2.0,
            count: 1,
        })
        .unwrap()
    {
        PlaybackResponse::Buffers { buffers, base_time } => {
            assert_eq!(buffers.len(), 1);
            assert!(base_time.is_some_and(|t| (t - 2.0).abs() < 0.05));
        }
        other => panic!("unexpected response {other:?}"),
    }

    handle.shutdown().unwrap();
}

#[test]
fn test_playback_actor_reports_missing_file() {
    let handle = PlaybackPipeline::spawn(PlaybackConfig::default(), DecoderRegistry::default())
        .unwrap();
    let response = handle
        .request(PlaybackRequest::LoadTrack {
            source: AudioSource::file("tests/fixtures/does-not-exist.mp3"),
        })
        .unwrap();
    match response {
        PlaybackResponse::Error(report) => assert_eq!(report.category, ErrorCategory::Io),
        other => panic!("unexpected response {other:?}"),
    }
}

// ============================================================================
// 非静音信号：斜坡解码器
// ============================================================================

/// 按字节偏移识别帧的解码器替身：流中第 k 个样本左声道为 k，右声道为 2k。
/// 与 MP3 解码器一样从下一个帧头开始解码，并自行丢弃 `samples_to_skip`。
struct RampDecoder {
    offsets: Arc<Vec<u64>>,
    samples_per_frame: u64,
    total_frames: u64,
    started: bool,
    skip: u64,
    target: usize,
    pending: Vec<f32>,
    output: u64,
    reached_end: bool,
}

impl RampDecoder {
    fn new(offsets: Arc<Vec<u64>>) -> Self {
        Self {
            offsets,
            samples_per_frame: SAMPLES_PER_FRAME,
            total_frames: 0,
            started: false,
            skip: 0,
            target: 1,
            pending: Vec::new(),
            output: 0,
            reached_end: false,
        }
    }

    fn flush(&mut self, count: usize) -> DecodedBuffer {
        let count = count.min(self.pending.len());
        let left: Vec<f32> = self.pending.drain(..count).collect();
        let right = left.iter().map(|k| 2.0 * k).collect();
        let start_sample = self.output;
        self.output += count as u64;
        DecodedBuffer {
            channels: vec![left, right],
            length: count,
            sample_rate: SAMPLE_RATE,
            start_sample,
        }
    }
}

impl Reusable for RampDecoder {
    fn reset(&mut self) {
        self.started = false;
        self.skip = 0;
        self.pending.clear();
        self.output = 0;
        self.reached_end = false;
    }
}

impl CodecDecoder for RampDecoder {
    fn start(&mut self, metadata: &StreamMetadata) -> AudioResult<()> {
        if self.started {
            return Err(AudioError::InvalidInput("already started".into()));
        }
        self.samples_per_frame = metadata.samples_per_frame as u64;
        self.total_frames = metadata.frames;
        self.skip = metadata.encoder_delay_samples as u64 + DECODER_DELAY;
        self.started = true;
        Ok(())
    }

    fn decode_until_flush(&mut self, buffer: &[u8], start_offset: u64) -> AudioResult<DecodeStep> {
        let end = start_offset + buffer.len() as u64;
        let mut frame = self.offsets.partition_point(|&o| o < start_offset);
        let mut consumed = self
            .offsets
            .get(frame)
            .map_or(end, |&o| o.min(end))
            .max(start_offset);

        while frame + 1 < self.offsets.len() && (frame as u64) < self.total_frames {
            let frame_end = self.offsets[frame + 1];
            if frame_end > end {
                break;
            }
            let first = frame as u64 * self.samples_per_frame;
            for k in first..first + self.samples_per_frame {
                if self.skip > 0 {
                    self.skip -= 1;
                } else {
                    self.pending.push(k as f32);
                }
            }
            consumed = frame_end;
            frame += 1;
            self.reached_end = frame as u64 >= self.total_frames;
            if self.pending.len() >= self.target {
                let flushed = self.flush(self.target);
                return Ok(DecodeStep {
                    consumed_until: consumed,
                    flushed: Some(flushed),
                });
            }
        }
        Ok(DecodeStep {
            consumed_until: consumed,
            flushed: None,
        })
    }

    fn end(&mut self) -> Option<DecodedBuffer> {
        if !self.started {
            return None;
        }
        self.started = false;
        if self.pending.is_empty() {
            None
        } else {
            Some(self.flush(self.pending.len()))
        }
    }

    fn apply_seek(&mut self, seek: &SeekResult) {
        self.pending.clear();
        self.output = 0;
        self.reached_end = false;
        self.skip = seek.samples_to_skip;
        if seek.frame == 0 {
            self.skip += DECODER_DELAY;
        }
    }

    fn current_sample_index(&self) -> u64 {
        self.output
    }

    fn set_target_buffer_frames(&mut self, frames: usize) {
        self.target = frames.max(1);
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn has_reached_end(&self) -> bool {
        self.reached_end
    }
}

fn ramp_registry(frames: usize) -> DecoderRegistry {
    let offsets = Arc::new(frame_offsets(frames));
    let mut registry = DecoderRegistry::empty();
    registry.register(
        CodecName::Mp3,
        Arc::new(move || Ok(Box::new(RampDecoder::new(offsets.clone())) as Box<dyn CodecDecoder>)),
    );
    registry
}

fn ramp_track() -> AudioSource {
    AudioSource::memory(Some("ramp.mp3".into()), silent_cbr(400))
}

/// 左声道样本值即流中位置；检查声道关系与跨缓冲连续性，返回首样本位置
fn check_ramp(buffers: &[mp3_stream_engine::processing::FilledBuffer]) -> f32 {
    let left: Vec<f32> = buffers.iter().flat_map(|b| b.channels[0].iter().copied()).collect();
    let right: Vec<f32> = buffers.iter().flat_map(|b| b.channels[1].iter().copied()).collect();
    assert!(left.windows(2).all(|w| w[1] - w[0] == 1.0), "ramp must be continuous");
    assert!(left.iter().zip(&right).all(|(l, r)| *r == 2.0 * l), "channels swapped or mixed");
    left[0]
}

#[test]
fn test_playback_ramp_alignment_after_seek() {
    let mut pipeline =
        PlaybackPipeline::new(PlaybackConfig::default(), ramp_registry(400)).unwrap();
    pipeline.load_track(&ramp_track()).unwrap();

    // 开头丢弃编码器延迟 576 + 解码器延迟 529
    let first = pipeline.fill_buffers(2).unwrap();
    assert_eq!(check_ramp(&first), 1105.0);

    let (after_seek, base) = pipeline.seek(5.0, 2).unwrap();
    let position = check_ramp(&after_seek);
    log(
        format!("定位到 {base:.4}s，首样本位置 {position}"),
        format!("seek landed at {base:.4}s, first sample position {position}"),
    );
    // 5.0s 落在第 191 帧，预热 9 帧后恰好从该帧首样本开始输出
    assert_eq!(position, (191 * SAMPLES_PER_FRAME) as f32);
    assert!((position as f64 - base * SAMPLE_RATE as f64).abs() < 0.5);
    assert_eq!(after_seek[0].start_time, base);

    let (rewound, base) = pipeline.seek(0.0, 1).unwrap();
    assert_eq!(base, 0.0);
    assert_eq!(check_ramp(&rewound), 1105.0);
}

#[test]
fn test_playback_ramp_mixed_to_mono() {
    let config = PlaybackConfig {
        output_channels: 1,
        ..PlaybackConfig::default()
    };
    let mut pipeline = PlaybackPipeline::new(config, ramp_registry(400)).unwrap();
    pipeline.load_track(&ramp_track()).unwrap();

    // 2→1 为 (L + R) / 2 = 1.5k
    let buffers = pipeline.fill_buffers(1).unwrap();
    assert_eq!(buffers[0].channels.len(), 1);
    assert!(
        buffers[0].channels[0]
            .iter()
            .enumerate()
            .all(|(i, &m)| m == 1.5 * (1105 + i) as f32)
    );

    let (after_seek, _) = pipeline.seek(5.0, 1).unwrap();
    assert_eq!(after_seek[0].channels[0][0], 1.5 * (191 * SAMPLES_PER_FRAME) as f32);
}
