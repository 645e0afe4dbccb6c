use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use audiobot::{wait_for_shutdown_signal, AppMode, Application, ShutdownManager};
use audiobot_application::PublishOptions;
use audiobot_config::{AppConfig, OutputFormat};
use audiobot_domain::{Job, JobType, TargetWorkerType, Task, Trigger};
use clap::{Args, Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 关闭信号之后额外等待消费者退出的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "audiobot")]
#[command(version)]
#[command(about = "音频机器人 - 任务分发与作业调度")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径，未指定时按默认路径查找
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行调度器消费者
    Scheduler,
    /// 运行Telegram客户端工作进程
    Worker {
        /// 覆盖配置中的 worker_id
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// 在同一进程内运行调度器和工作进程
    All,
    /// 发布一个任务
    PublishTask(PublishTaskArgs),
    /// 向调度器注册或替换作业
    RegisterJob(RegisterJobArgs),
    /// 广播关闭命令给所有消费者
    Shutdown,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TaskKindArg {
    ForwardAudio,
    CheckUsername,
    IndexChannel,
    RunJob,
}

#[derive(Args, Debug)]
struct PublishTaskArgs {
    /// 任务类型
    #[arg(value_enum)]
    kind: TaskKindArg,

    /// 音频、用户名或频道的键；run-job 时为作业类型
    key: String,

    /// 发给指定的客户端
    #[arg(long)]
    client: Option<String>,

    #[arg(long)]
    priority: Option<u8>,

    /// 跳过可用内存检查
    #[arg(long)]
    skip_memory_check: bool,
}

#[derive(Args, Debug)]
struct RegisterJobArgs {
    /// 作业类型，例如 count_interactions
    job_type: String,

    /// 触发间隔（秒）
    #[arg(long, conflicts_with = "cron", required_unless_present = "cron")]
    interval: Option<u64>,

    /// 首次触发前的等待时间（秒）
    #[arg(long, default_value_t = 0, requires = "interval")]
    start_offset: u64,

    /// CRON表达式（含秒，UTC）
    #[arg(long)]
    cron: Option<String>,

    #[arg(long)]
    priority: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            cli.config.as_deref().unwrap_or("<默认路径>")
        )
    })?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }

    init_logging(&config.observability.log_level, config.observability.log_format)?;
    init_metrics(config.observability.metrics_bind_address.as_deref())?;

    match cli.command {
        Commands::Scheduler => run_consumers(config, AppMode::Scheduler).await,
        Commands::Worker { worker_id } => {
            if let Some(id) = worker_id {
                config.worker.worker_id = id;
            }
            run_consumers(config, AppMode::Worker).await
        }
        Commands::All => run_consumers(config, AppMode::All).await,
        Commands::PublishTask(args) => publish_task(config, args).await,
        Commands::RegisterJob(args) => register_job(config, args).await,
        Commands::Shutdown => {
            let app = Application::new(config).await?;
            let outcome = app
                .publish(Task::shutdown(), PublishOptions::default())
                .await?;
            info!(
                "关闭命令已发布: {} (新建: {})",
                outcome.record.key, outcome.created
            );
            Ok(())
        }
    }
}

async fn run_consumers(config: AppConfig, mode: AppMode) -> Result<()> {
    info!("启动音频机器人，模式: {:?}", mode);
    let app = std::sync::Arc::new(Application::new(config).await?);
    let shutdown = ShutdownManager::new();

    let mut handle = {
        let app = app.clone();
        let sender = shutdown.sender();
        tokio::spawn(async move { app.run(mode, sender).await })
    };

    let result = tokio::select! {
        joined = &mut handle => joined,
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown.shutdown();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("应用关闭超时，强制退出");
                    handle.abort();
                    return Ok(());
                }
            }
        }
    };

    match result {
        Ok(Ok(())) => {
            info!("应用已优雅关闭");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("应用运行失败: {:#}", e);
            Err(e)
        }
        Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
    }
}

async fn publish_task(config: AppConfig, args: PublishTaskArgs) -> Result<()> {
    let mut task = match args.kind {
        TaskKindArg::ForwardAudio => Task::forward_audio(args.key.as_str()),
        TaskKindArg::CheckUsername => Task::check_username(args.key.as_str()),
        TaskKindArg::IndexChannel => Task::index_channel(args.key.as_str()),
        TaskKindArg::RunJob => {
            Task::run_job(args.key.parse::<JobType>().map_err(anyhow::Error::msg)?)
        }
    };

    let mut options = PublishOptions {
        priority: args.priority,
        check_memory: !args.skip_memory_check,
        ..PublishOptions::default()
    };
    if let Some(client) = args.client {
        if matches!(args.kind, TaskKindArg::RunJob) {
            anyhow::bail!("作业只能由调度器执行，run-job 不能指定 --client");
        }
        task = task.with_target(TargetWorkerType::OneSpecificTelegramClient);
        options.routing_key = Some(client);
    }

    let app = Application::new(config).await?;
    let outcome = app.publish(task, options).await?;
    if outcome.created {
        info!("任务已发布: {}", outcome.record.key);
    } else {
        info!(
            "已有相同的活跃任务，未重复发布: {} ({})",
            outcome.record.key, outcome.record.status
        );
    }
    Ok(())
}

async fn register_job(config: AppConfig, args: RegisterJobArgs) -> Result<()> {
    let job_type = args
        .job_type
        .parse::<JobType>()
        .map_err(anyhow::Error::msg)?;
    let trigger = match (args.interval, args.cron) {
        (Some(period), None) => Trigger::interval(period, args.start_offset),
        (None, Some(expression)) => Trigger::cron(expression),
        _ => anyhow::bail!("必须且只能指定 --interval 或 --cron 之一"),
    };
    let mut job = Job::new(job_type, trigger);
    if let Some(priority) = args.priority {
        job.priority = priority;
    }

    let app = Application::new(config).await?;
    app.register_job(&job).await?;
    info!("作业注册已发布: {} {:?}", job.job_type, job.trigger);
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: OutputFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        OutputFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        OutputFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}

/// 配置了监听地址时安装 Prometheus 导出器
fn init_metrics(bind_address: Option<&str>) -> Result<()> {
    let Some(address) = bind_address else {
        return Ok(());
    };
    let address: SocketAddr = address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus导出器失败")?;
    info!("Prometheus指标监听: {}", address);
    Ok(())
}
