//! 常量和默认配置集中管理
//!
//! 将所有重要常量集中定义，避免"默认值漂移"和重复定义

/// 默认配置值
pub mod defaults {
    /// 字节窗口的默认预读量（字节）
    pub const WINDOW_LOOKAHEAD: u64 = 64 * 1024;

    /// 可重试I/O错误的最大重试次数
    pub const IO_RETRY_LIMIT: u32 = 5;

    /// 重试退避的基本单位（毫秒），第n次重试等待 n × 该值
    pub const IO_RETRY_BACKOFF_MS: u64 = 10;

    /// 默认多文件并行并发度
    pub const PARALLEL_FILES_DEGREE: usize = 4;

    /// 默认输出采样率（playback）
    pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

    /// 默认输出声道数（playback）
    pub const OUTPUT_CHANNELS: usize = 2;

    /// 默认重采样质量（0–10）
    pub const RESAMPLER_QUALITY: u8 = 4;
}

/// MP3容器相关常量
pub mod mp3 {
    /// 同步搜索上限：2314 × 20 字节
    pub const MAX_SYNC_SCAN_BYTES: u64 = 2314 * 20;

    /// 无厂商头时要求的连续一致帧头数量
    pub const REQUIRED_HEADERS: usize = 5;

    /// 最短可接受时长（秒）
    pub const MIN_DURATION_SECONDS: f64 = 3.0;

    /// 默认编码器延迟（样本）
    pub const DEFAULT_ENCODER_DELAY: u32 = 576;

    /// VBRI头对应的编码器延迟（样本）
    pub const VBRI_ENCODER_DELAY: u32 = 1159;

    /// 解码器固有延迟（样本）
    pub const DECODER_DELAY: u32 = 529;

    /// 单帧最大字节数（MPEG-2.5 8kHz 160kbps + padding）
    pub const MAX_FRAME_BYTES: usize = 2881;

    /// 连续无效帧上限，超过后放弃解码
    pub const MAX_INVALID_FRAMES: usize = 100;

    /// 向前回退的帧数，为位储备（bit reservoir）预热
    pub const SEEK_PREROLL_FRAMES: u64 = 9;

    /// 单次 fill_until 调用最多扫描的帧数
    pub const MAX_FRAMES_PER_FILL: u64 = 100_000;

    /// RIFF内MP3：chunk扫描窗口（字节）
    pub const WAV_CHUNK_SCAN_BYTES: u64 = 4096;
}

/// 资源池常量
pub mod pool {
    /// 每个key首次使用时预创建的实例数
    pub const PREALLOCATE: usize = 2;

    /// 每个key允许存在的实例上限，超过即视为泄漏
    pub const CEILING: usize = 6;

    /// 解码器插件构造失败时的重试次数
    pub const PLUGIN_RETRIES: u32 = 3;

    /// 插件构造重试退避单位（毫秒）
    pub const PLUGIN_BACKOFF_MS: u64 = 5;
}

/// 分析管线常量
pub mod analysis {
    /// 每次解码块覆盖的音频时长（秒）
    pub const CHUNK_SECONDS: u32 = 30;

    /// 读取块时的预读放大系数
    pub const READ_PADDING_FACTOR: u64 = 2;

    /// 等待队列上限
    pub const MAX_QUEUED_JOBS: usize = 8;

    /// 超过该时长（秒）的曲目只返回时长
    pub const MAX_ANALYZE_SECONDS: f64 = 30.0 * 60.0;

    /// 时长未知时的文件大小上限（字节）
    pub const MAX_ANALYZE_BYTES: u64 = 100 * 1024 * 1024;

    /// 发出剩余时间估计的进度阈值
    pub const ESTIMATE_AFTER_PROGRESS: f64 = 0.15;

    /// 分析 actor 占用单核的比例上限
    pub const MAX_CPU_UTILIZATION: f64 = 0.5;
}

/// 播放管线常量
pub mod playback {
    /// 每个输出缓冲的默认时长（秒）
    pub const BUFFER_SECONDS: f64 = 0.5;

    /// 读取块时的预读放大系数
    pub const READ_PADDING_FACTOR: u64 = 4;
}

/// 响度计常量（EBU R128）
pub mod loudness {
    /// 参考响度（LUFS），track gain = 参考 − 积分响度
    pub const REFERENCE_LUFS: f64 = -18.0;

    /// 静音判定阈值（LUFS）
    pub const SILENCE_THRESHOLD_LUFS: f64 = -63.0;

    /// 绝对门限（LUFS）
    pub const ABSOLUTE_GATE_LUFS: f64 = -70.0;

    /// 相对门限系数（-10 LU）
    pub const RELATIVE_GATE_FACTOR: f64 = 0.1;

    /// LRA相对门限（-20 LU）
    pub const LRA_RELATIVE_GATE_FACTOR: f64 = 0.01;

    /// LRA下/上百分位
    pub const LRA_LOWER_PERCENTILE: f64 = 0.10;
    pub const LRA_UPPER_PERCENTILE: f64 = 0.95;
}

/// 声学指纹常量
pub mod fingerprint {
    /// 指纹输入采样率
    pub const SAMPLE_RATE: u32 = 11_025;

    /// FFT帧长
    pub const FRAME_SIZE: usize = 4096;

    /// 帧移
    pub const HOP_SIZE: usize = 1365;

    /// 最长处理时长（秒）
    pub const MAX_DURATION_SECONDS: usize = 120;

    /// 计算指纹所需的最短时长（秒）
    pub const MIN_DURATION_SECONDS: usize = 7;

    /// 有效频点范围 [MIN_BIN, MAX_BIN)
    pub const MIN_BIN: usize = 10;
    pub const MAX_BIN: usize = 1308;

    /// 指纹所用重采样质量
    pub const RESAMPLER_QUALITY: u8 = 0;

    /// 压缩格式的算法号
    pub const ALGORITHM: u8 = 1;
}
