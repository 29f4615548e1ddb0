use std::{path::Path, time::Duration};

use tokio::{fs, sync::mpsc};

use super::{process::run_tool, ConvertError, ToolPaths};
use crate::job::progress::ProgressUpdate;

/// Renders a Word document to PDF with a headless LibreOffice.
///
/// soffice names its output after the input, so it writes into a private
/// directory next to `output` and the result is moved into place. Each run
/// also gets its own profile directory; concurrent instances sharing the
/// default profile block on its lock.
pub async fn word_to_pdf(
    tools: &ToolPaths,
    input: &Path,
    output: &Path,
    limit: Duration,
    tx: &mpsc::UnboundedSender<ProgressUpdate>,
) -> Result<(), ConvertError> {
    let work_dir = output
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("soffice");
    fs::create_dir_all(work_dir.join("profile")).await?;
    let work_dir = fs::canonicalize(&work_dir).await?;

    let args = vec![
        format!(
            "-env:UserInstallation=file://{}",
            work_dir.join("profile").display()
        ),
        "--headless".to_string(),
        "--convert-to".to_string(),
        "pdf".to_string(),
        "--outdir".to_string(),
        work_dir.display().to_string(),
        input.display().to_string(),
    ];
    run_tool(&tools.soffice, &args, limit, tx, |_| None).await?;

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ConvertError::Internal("input has no file name".to_string()))?;
    let produced = work_dir.join(format!("{}.pdf", stem));
    if fs::metadata(&produced).await.is_err() {
        return Err(ConvertError::MissingOutput);
    }
    fs::rename(&produced, output).await?;
    let _ = tx.send(ProgressUpdate::Fraction(1.0));
    Ok(())
}

/// Converts a PDF to DOCX with pdf2docx, which logs one `(n/m)` line per page.
pub async fn pdf_to_word(
    tools: &ToolPaths,
    input: &Path,
    output: &Path,
    limit: Duration,
    tx: &mpsc::UnboundedSender<ProgressUpdate>,
) -> Result<(), ConvertError> {
    let args = vec![
        "convert".to_string(),
        input.display().to_string(),
        output.display().to_string(),
    ];
    run_tool(&tools.pdf2docx, &args, limit, tx, page_fraction).await
}

fn page_fraction(line: &str) -> Option<f32> {
    let (_, rest) = line.split_once('(')?;
    let (inner, _) = rest.split_once(')')?;
    let (done, total) = inner.split_once('/')?;
    let done: u32 = done.trim().parse().ok()?;
    let total: u32 = total.trim().parse().ok()?;
    (total > 0).then(|| (done as f32 / total as f32).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_counters_become_fractions() {
        assert_eq!(page_fraction("[INFO] (1/4) Page 1"), Some(0.25));
        assert_eq!(page_fraction("[INFO] (4/4) Page 4"), Some(1.0));
        assert_eq!(page_fraction("[INFO] [3/4] Parsing pages..."), None);
        assert_eq!(page_fraction("(0/0)"), None);
        assert_eq!(page_fraction("Terminated in 1.2s."), None);
    }

    #[tokio::test]
    async fn soffice_without_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("letter.docx");
        std::fs::write(&input, b"PK").unwrap();
        // `true` accepts any arguments, exits 0 and writes nothing
        let tools = ToolPaths {
            soffice: "true".to_string(),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = word_to_pdf(
            &tools,
            &input,
            &dir.path().join("out").join("letter.pdf"),
            Duration::from_secs(5),
            &tx,
        )
        .await;
        assert!(matches!(result, Err(ConvertError::MissingOutput)));
    }
}
