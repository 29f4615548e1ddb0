use std::time::Duration;

use convertd::{
    config::Config, converter::ToolPaths, http::start_http, pipeline::dispatch, state::AppContext,
};
use env_logger::Env;
use log::{info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

async fn tool_version(program: &str, arg: &str) -> anyhow::Result<String> {
    let output = tokio::process::Command::new(program).arg(arg).output().await?;
    if !output.status.success() {
        anyhow::bail!("{} exited with {}", program, output.status);
    }
    let version = String::from_utf8(output.stdout)?;
    // first line only, e.g. "ffmpeg version 7.1 Copyright ..."
    let line = version
        .lines()
        .next()
        .ok_or_else(|| anyhow::anyhow!("{} printed no version", program))?;
    Ok(line.trim().to_string())
}

/// Tools are only needed by some conversions, so a missing one is a warning.
async fn log_tool_versions(tools: &ToolPaths) {
    for (program, arg) in [
        (&tools.ffmpeg, "-version"),
        (&tools.ffprobe, "-version"),
        (&tools.soffice, "--version"),
        (&tools.pdf2docx, "--version"),
    ] {
        match tool_version(program, arg).await {
            Ok(version) => info!("found {}", version),
            Err(e) => warn!(
                "{} is unavailable, conversions that need it will fail ({})",
                program, e
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("convertd")).init();
    info!("starting convertd");

    let config = Config::from_env()?;
    log_tool_versions(&config.tools).await;

    let object_ttl = config.object_ttl;
    let (ctx, jobs, objects) = AppContext::open(config).await?;
    info!(
        "job store at {}, bucket {} at {}",
        ctx.config.data_dir.display(),
        ctx.config.bucket,
        ctx.config.object_dir.display()
    );

    let _expiry = jobs.spawn_expiry(SWEEP_INTERVAL);
    let _lifecycle = objects.spawn_lifecycle(object_ttl, SWEEP_INTERVAL);
    let _dispatcher = dispatch::spawn(ctx.clone());

    start_http(ctx).await?;
    Ok(())
}
