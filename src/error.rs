use std::fmt;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 运行被主动停止（不是故障）
    #[error("操作已取消")]
    Cancelled,

    /// 外部服务调用失败（视觉服务、渲染器）
    #[error("{stage} 调用失败: {cause:#}")]
    Service {
        stage: ServiceStage,
        cause: anyhow::Error,
    },

    /// 扫描已在运行
    #[error("扫描正在进行中，拒绝再次启动")]
    ScanBusy,

    /// 批处理队列已在运行
    #[error("批处理队列正在运行，拒绝再次启动")]
    BatchBusy,

    /// 页码超出文档范围
    #[error("页码 {page} 超出范围 [1, {page_count}]")]
    InvalidPage { page: u32, page_count: u32 },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 文件操作错误
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),

    /// 其他错误（用于包装第三方库错误）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 出错的外部调用阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStage {
    Render,
    Extract,
    Audit,
    Correct,
}

impl fmt::Display for ServiceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStage::Render => "页面渲染",
            ServiceStage::Extract => "区域提取",
            ServiceStage::Audit => "区域审核",
            ServiceStage::Correct => "区域修正",
        };
        f.write_str(name)
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建外部服务调用错误
    pub fn service(stage: ServiceStage, cause: impl Into<anyhow::Error>) -> Self {
        AppError::Service {
            stage,
            cause: cause.into(),
        }
    }

    /// 是否为取消（取消不算故障，只需安静地退出）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
