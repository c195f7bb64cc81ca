use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 程序配置文件
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 已渲染页面图片所在目录
    pub page_image_folder: String,
    /// 起始页（从 1 开始）
    pub start_page: u32,
    /// 是否从上次中断处继续
    pub resume: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    /// 已确认的题目是否带有 slot-mode 标签（需要补图）
    pub slot_mode: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 补图服务配置 ---
    pub image_fill_endpoint: String,
    // --- 扫描节奏 ---
    /// 暂停时重新检查的间隔（毫秒）
    pub pause_check_interval_ms: u64,
    /// 确认后每个区域的展示停留时间（毫秒）
    pub verify_delay_per_region_ms: u64,
    /// 确认展示停留的上限（毫秒）
    pub verify_delay_max_ms: u64,
    // --- 批处理节奏 ---
    /// 开始轮询前的宽限期（秒）
    pub batch_grace_period_secs: u64,
    /// 轮询间隔（毫秒）
    pub batch_poll_interval_ms: u64,
    /// 单个题目的最长等待（秒）
    pub batch_ceiling_secs: u64,
    /// 批处理事件通道容量
    pub batch_event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_image_folder: "pages".to_string(),
            start_page: 1,
            resume: false,
            verbose_logging: false,
            output_log_file: "scan_log.txt".to_string(),
            slot_mode: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gemini-2.5-pro".to_string(),
            image_fill_endpoint: "http://127.0.0.1:8790/fill".to_string(),
            pause_check_interval_ms: 500,
            verify_delay_per_region_ms: 150,
            verify_delay_max_ms: 1500,
            batch_grace_period_secs: 5,
            batch_poll_interval_ms: 1000,
            batch_ceiling_secs: 120,
            batch_event_capacity: 256,
        }
    }
}

impl Config {
    /// 只从环境变量读取（未设置的字段使用默认值）
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 读取 TOML 配置文件，再用环境变量覆盖
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
                path: path.display().to_string(),
                source,
            })?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(self) -> Self {
        Self {
            page_image_folder: env_string("PAGE_IMAGE_FOLDER", self.page_image_folder),
            start_page: env_parse("START_PAGE", self.start_page),
            resume: env_parse("RESUME_SCAN", self.resume),
            verbose_logging: env_parse("VERBOSE_LOGGING", self.verbose_logging),
            output_log_file: env_string("OUTPUT_LOG_FILE", self.output_log_file),
            slot_mode: env_parse("SLOT_MODE", self.slot_mode),
            llm_api_key: env_string("LLM_API_KEY", self.llm_api_key),
            llm_api_base_url: env_string("LLM_API_BASE_URL", self.llm_api_base_url),
            llm_model_name: env_string("LLM_MODEL_NAME", self.llm_model_name),
            image_fill_endpoint: env_string("IMAGE_FILL_ENDPOINT", self.image_fill_endpoint),
            pause_check_interval_ms: env_parse("PAUSE_CHECK_INTERVAL_MS", self.pause_check_interval_ms),
            verify_delay_per_region_ms: env_parse("VERIFY_DELAY_PER_REGION_MS", self.verify_delay_per_region_ms),
            verify_delay_max_ms: env_parse("VERIFY_DELAY_MAX_MS", self.verify_delay_max_ms),
            batch_grace_period_secs: env_parse("BATCH_GRACE_PERIOD_SECS", self.batch_grace_period_secs),
            batch_poll_interval_ms: env_parse("BATCH_POLL_INTERVAL_MS", self.batch_poll_interval_ms),
            batch_ceiling_secs: env_parse("BATCH_CEILING_SECS", self.batch_ceiling_secs),
            batch_event_capacity: env_parse("BATCH_EVENT_CAPACITY", self.batch_event_capacity),
        }
    }

    /// 扫描控制器使用的参数
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            pause_check_interval: Duration::from_millis(self.pause_check_interval_ms),
            verify_delay_per_region: Duration::from_millis(self.verify_delay_per_region_ms),
            verify_delay_max: Duration::from_millis(self.verify_delay_max_ms),
            slot_mode: self.slot_mode,
        }
    }

    /// 批处理队列使用的参数
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            grace_period: Duration::from_secs(self.batch_grace_period_secs),
            poll_interval: Duration::from_millis(self.batch_poll_interval_ms),
            ceiling: Duration::from_secs(self.batch_ceiling_secs),
            event_capacity: self.batch_event_capacity.max(1),
        }
    }
}

/// 扫描控制器参数
#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub pause_check_interval: Duration,
    pub verify_delay_per_region: Duration,
    pub verify_delay_max: Duration,
    pub slot_mode: bool,
}

impl ScanConfig {
    /// 确认结果的展示停留时间，与区域数量成正比
    pub fn verify_delay(&self, region_count: usize) -> Duration {
        let count = u32::try_from(region_count).unwrap_or(u32::MAX);
        self.verify_delay_per_region
            .saturating_mul(count)
            .min(self.verify_delay_max)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Config::default().scan_config()
    }
}

/// 批处理队列参数
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub ceiling: Duration,
    pub event_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Config::default().batch_config()
    }
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_batch_timing() {
        let batch = Config::default().batch_config();
        assert_eq!(batch.grace_period, Duration::from_secs(5));
        assert_eq!(batch.poll_interval, Duration::from_secs(1));
        assert_eq!(batch.ceiling, Duration::from_secs(120));
    }

    #[test]
    fn test_verify_delay_is_capped() {
        let scan = ScanConfig {
            pause_check_interval: Duration::from_millis(10),
            verify_delay_per_region: Duration::from_millis(200),
            verify_delay_max: Duration::from_millis(500),
            slot_mode: false,
        };
        assert_eq!(scan.verify_delay(0), Duration::ZERO);
        assert_eq!(scan.verify_delay(2), Duration::from_millis(400));
        assert_eq!(scan.verify_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn test_load_toml_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "page_image_folder = \"scans/paper-7\"").unwrap();
        writeln!(file, "slot_mode = true").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.page_image_folder, "scans/paper-7");
        assert!(config.slot_mode);
        assert_eq!(config.start_page, 1);
    }

    #[test]
    fn test_load_reports_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "start_page = \"not a number\"").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseFailed { .. }));
    }
}
