use dashboard_hub::config;
use dashboard_hub::simulator::EventSimulator;
use dashboard_hub::ws_server::{HubState, WsService};
use log::{error, info, LevelFilter};
use rust_websocket_utils::server::ConnectionRegistry;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 未设置 RUST_LOG 时，日志级别在配置加载后按配置文件调整
    let env_controlled = env::var_os("RUST_LOG").is_some();
    let mut logger = env_logger::Builder::new();
    logger.format_timestamp_millis();
    if env_controlled {
        logger.parse_default_env();
    } else {
        logger.filter_level(LevelFilter::Trace);
    }
    logger.init();
    if !env_controlled {
        log::set_max_level(LevelFilter::Info);
    }
    info!("[主程序] 日志系统已初始化 (env_logger)。");

    let config_path = config::config_file_path();
    let app_config = config::load_or_create_config(&config_path);
    app_config.validate()?;
    if !env_controlled {
        log::set_max_level(app_config.log_level_filter());
    }
    info!(
        "[主程序] 应用配置已加载 ({:?})，监听地址 {}，日志级别 {}",
        config_path,
        app_config.websocket.bind_address(),
        app_config.log_level_filter()
    );

    // 注册表随服务启动创建、随服务停止关闭
    let registry = Arc::new(ConnectionRegistry::new());
    let state = Arc::new(HubState::new(
        Arc::clone(&registry),
        app_config.websocket.outbound_queue_capacity,
    ));

    let simulator = if app_config.simulator.enabled {
        Some(EventSimulator::new(Arc::clone(&state), app_config.simulator.clone()).spawn())
    } else {
        info!("[主程序] 模拟事件源已在配置中禁用。");
        None
    };

    let shutdown_registry = Arc::clone(&registry);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[主程序] 无法监听 Ctrl-C 信号: {}", e);
            std::future::pending::<()>().await;
        }
        info!("[主程序] 收到 Ctrl-C，开始关闭服务...");
        let closed = shutdown_registry.shutdown();
        info!("[主程序] 已关闭 {} 个客户端连接。", closed);
    };

    let service = WsService::new(app_config.websocket.clone(), Arc::clone(&state));
    let result = service.start(shutdown).await;

    if let Some(simulator) = simulator {
        simulator.stop().await;
    }
    if !registry.is_closed() {
        registry.shutdown();
    }
    info!("[主程序] 服务已退出。");
    result
}
