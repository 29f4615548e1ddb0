use std::{collections::VecDeque, process::Stdio, time::Duration};

use log::{debug, info, warn};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncRead, BufReader},
    process::Command,
    sync::mpsc,
};

use super::ConvertError;
use crate::job::progress::ProgressUpdate;

/// How many trailing stderr lines end up in a failure message.
const STDERR_TAIL: usize = 20;

/// Spawns `program`, forwarding each output line that `progress` recognises as
/// a [`ProgressUpdate::Fraction`] and every other stderr line as a
/// [`ProgressUpdate::Log`].
///
/// The child is killed if it outlives `limit` or if this future is dropped.
pub async fn run_tool<F>(
    program: &str,
    args: &[String],
    limit: Duration,
    tx: &mpsc::UnboundedSender<ProgressUpdate>,
    progress: F,
) -> Result<(), ConvertError>
where
    F: Fn(&str) -> Option<f32> + Clone + Send + 'static,
{
    info!("running '{} {}'", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ConvertError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ConvertError::Internal("failed to take stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ConvertError::Internal("failed to take stderr".to_string()))?;

    let stdout_task = tokio::spawn(pump(stdout, tx.clone(), progress.clone(), false));
    let stderr_task = tokio::spawn(pump(stderr, tx.clone(), progress, true));

    let status = match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            warn!("{} overran {:?}, killing it", program, limit);
            if let Err(e) = child.kill().await {
                warn!("failed to kill {}: {}", program, e);
            }
            return Err(ConvertError::TimedOut(limit));
        }
    };

    // helpers forked by the tool can hold the pipes open past its exit
    let _ = tokio::time::timeout(Duration::from_secs(5), stdout_task).await;
    let tail = match tokio::time::timeout(Duration::from_secs(5), stderr_task).await {
        Ok(Ok(tail)) => tail,
        _ => Vec::new(),
    };

    if !status.success() {
        return Err(ConvertError::Failed {
            program: program.to_string(),
            status: status.to_string(),
            stderr: tail.join("\n"),
        });
    }
    Ok(())
}

async fn pump<R, F>(
    reader: R,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
    progress: F,
    keep_log: bool,
) -> Vec<String>
where
    R: AsyncRead + Unpin,
    F: Fn(&str) -> Option<f32>,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(fraction) = progress(&line) {
            let _ = tx.send(ProgressUpdate::Fraction(fraction));
            continue;
        }
        if !keep_log || line.trim().is_empty() {
            continue;
        }
        debug!("{}", line);
        let _ = tx.send(ProgressUpdate::Log(line.clone()));
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into()
}
