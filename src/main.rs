use anyhow::Result;
use question_region_scan::utils::logging;
use question_region_scan::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = match std::env::var("SCAN_CONFIG") {
        Ok(path) => Config::load(path)?,
        Err(_) => Config::from_env(),
    };

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
