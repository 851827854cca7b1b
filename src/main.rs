use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use hotconf::app::Application;
use hotconf::common::{init_logging, load_settings, wait_for_shutdown_signal, CliOverrides};
use hotconf::shutdown::ShutdownManager;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("hotconf")
        .version(env!("CARGO_PKG_VERSION"))
        .about("配置热重载守护进程")
        .arg(
            Arg::new("settings")
                .short('s')
                .long("settings")
                .value_name("FILE")
                .help("守护进程设置文件 (toml/yaml/json)"),
        )
        .arg(
            Arg::new("config-dir")
                .short('d')
                .long("config-dir")
                .value_name("DIR")
                .help("被管理的配置文件目录"),
        )
        .arg(
            Arg::new("env")
                .short('e')
                .long("env")
                .value_name("NAME")
                .help("运行环境，默认读取 APP_ENV / NODE_ENV"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("no-watch")
                .long("no-watch")
                .help("只加载一次，不监听文件变化")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let settings_file = matches.get_one::<String>("settings").map(PathBuf::from);
    let overrides = CliOverrides {
        config_dir: matches.get_one::<String>("config-dir").map(PathBuf::from),
        environment: matches.get_one::<String>("env").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        no_watch: matches.get_flag("no-watch"),
    };

    let settings = load_settings(settings_file.as_deref(), &overrides)?;

    // 初始化日志系统
    init_logging(&settings.log_level, &settings.log_format)?;

    info!("启动配置热重载守护进程");
    info!("配置目录: {}", settings.manager.config_dir.display());
    if let Some(env) = &settings.manager.environment {
        info!("运行环境: {}", env);
    }

    let app = Arc::new(Application::new(settings)?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let shutdown_rx = shutdown_manager.subscribe();
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    // 首次加载失败时应用会提前结束，不必等待信号
    let finished = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown();
            None
        }
        result = &mut app_handle => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        // 等待应用关闭，设置超时
        None => match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
            Ok(result) => result,
            Err(_) => {
                warn!("守护进程关闭超时，强制退出");
                return Ok(());
            }
        },
    };

    match result {
        Ok(Ok(())) => info!("守护进程已优雅关闭"),
        Ok(Err(e)) => {
            error!("守护进程运行失败: {e:#}");
            return Err(e);
        }
        Err(e) => error!("守护进程任务异常退出: {e}"),
    }

    Ok(())
}
