//! # Credential Proxy 主程序
//!
//! 加载配置、初始化凭据存储并启动客户端 HTTP 服务

use std::path::PathBuf;

use clap::Parser;
use credential_proxy::{
    Result,
    config::{AppConfig, ConfigManager},
    lerror, linfo, lwarn,
    logging::{self, LogComponent, LogStage},
    server::{AppState, ProxyServer},
};

/// Credential Proxy CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径，缺省时尝试 config/credential-proxy.toml
    #[arg(short, long, env = "CREDENTIAL_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// 日志级别，RUST_LOG 优先
    #[arg(long)]
    log_level: Option<String>,

    /// 只加载并校验配置，打印摘要后退出
    #[arg(long)]
    check: bool,

    /// 打印日志配置说明后退出
    #[arg(long)]
    logging_help: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.logging_help {
        logging::print_logging_help();
        return Ok(());
    }

    logging::init_logging(args.log_level.as_deref());

    let config = match ConfigManager::load(args.config.as_deref()) {
        Ok(manager) => manager.into_config(),
        Err(e) => {
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Main,
                "config_load_failed",
                &format!("配置加载失败: {e:?}")
            );
            std::process::exit(2);
        }
    };

    if args.check {
        print_summary(&config);
        return Ok(());
    }

    let state = AppState::from_config(&config)?;
    if state.detector().target_policy().is_open() {
        lwarn!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "target_policy_open",
            "detect.allowed_hosts is empty, detection requests may be forwarded to any host"
        );
    }

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "service_starting",
        "服务启动",
        app_keys = ?state.store().keys()
    );

    if let Err(e) = ProxyServer::new(config.server, state).serve().await {
        lerror!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "service_start_failed",
            &format!("服务启动失败: {e:?}")
        );
        std::process::exit(1);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}

/// 打印配置摘要，不输出密钥
fn print_summary(config: &AppConfig) {
    println!("✅ 配置有效");
    println!("  监听地址:     {}", config.listen_address());
    println!("  token 接口:   {}", config.server.token_path);
    println!("  检测接口:     {}", config.server.detect_path);
    println!("  token 上游:   {}", config.upstream.token_endpoint);
    println!("  刷新锁:       {:?}", config.upstream.refresh_lock);
    if config.detect.allowed_hosts.is_empty() {
        println!("  检测目标:     不限制");
    } else {
        println!("  检测目标:     {}", config.detect.allowed_hosts.join(", "));
    }
    for credential in &config.credentials {
        println!(
            "  凭据:         {} (sandbox={}, check_referer={})",
            credential.app_key, credential.sandbox, credential.check_referer
        );
    }
}
