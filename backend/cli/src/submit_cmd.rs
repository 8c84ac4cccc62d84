//! `ocrforge submit`: stream local images to a server and report results.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use ocrforge_core::{CloseStatus, JobRequest, JobResult, ServerFrame, DEFAULT_MAX_MESSAGE_SIZE};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::terminal_output::{note_error, note_info, note_success, note_warn, render_table, Column};

/// Extensions picked up when scanning a directory.
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif", "webp", "pbm", "pgm", "ppm",
];

/// Longest text shown per result in the summary table.
const PREVIEW_CHARS: usize = 40;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultLine<'a> {
    file: &'a str,
    #[serde(flatten)]
    result: &'a JobResult,
}

pub async fn run(server: &str, json: bool, paths: &[PathBuf]) -> Result<ExitCode> {
    let images = collect_images(paths)?;
    if images.is_empty() {
        bail!("no image files found");
    }

    let (mut sender, mut results) = ocrforge_gateway::connect(server, DEFAULT_MAX_MESSAGE_SIZE)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;
    if !json {
        note_info(&format!("Submitting {} image(s) to {server}", images.len()));
    }

    let jobs: Vec<(String, PathBuf)> = images
        .into_iter()
        .map(|path| (Uuid::new_v4().to_string(), path))
        .collect();
    let names: HashMap<String, String> = jobs
        .iter()
        .map(|(id, path)| (id.clone(), display_name(path)))
        .collect();
    let order: Vec<String> = jobs.iter().map(|(id, _)| id.clone()).collect();

    let upload = tokio::spawn(async move {
        for (id, path) in jobs {
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            debug!(image_id = %id, bytes = data.len(), "Submitting image");
            sender.send(JobRequest::new(id, display_name(&path), data)).await?;
        }
        sender.finish().await
    });

    let mut received: HashMap<String, JobResult> = HashMap::new();
    let mut status = None;
    while let Some(frame) = results.next().await? {
        match frame {
            ServerFrame::Result(result) => {
                let name = names.get(&result.image_id).map(String::as_str).unwrap_or("?");
                print_result(name, &result, json)?;
                received.insert(result.image_id.clone(), result);
            }
            ServerFrame::Close(close) => status = Some(close),
        }
    }

    match upload.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Upload stopped early"),
        Err(e) => warn!(error = %e, "Upload task failed"),
    }

    if !json {
        print!("\n{}", summary_table(&order, &names, &received));
    }

    match status {
        Some(CloseStatus::Ok) => {
            let failed = received.values().filter(|r| !r.success).count();
            if !json {
                note_success(&format!(
                    "{} result(s), {} failed",
                    received.len(),
                    failed
                ));
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(CloseStatus::Error { message }) => {
            note_error(&format!("Server closed the session with an error: {message}"));
            Ok(ExitCode::FAILURE)
        }
        None => {
            note_error("Server hung up before closing the session");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Files are taken as given; directories contribute their image files
/// (one level, sorted by name).
fn collect_images(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for path in paths {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("cannot access {}", path.display()))?;
        if !meta.is_dir() {
            images.push(path.clone());
            continue;
        }

        let mut found: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("cannot read directory {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        found.sort();
        if found.is_empty() {
            note_warn(&format!("No images in {}", path.display()));
        }
        images.extend(found);
    }
    Ok(images)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_result(name: &str, result: &JobResult, json: bool) -> Result<()> {
    if json {
        let line = ResultLine { file: name, result };
        println!("{}", serde_json::to_string(&line)?);
    } else if result.success {
        note_success(&format!("{name}\n{}", result.extracted_text));
    } else {
        note_warn(&format!("{name}: {}", result.error_message));
    }
    Ok(())
}

fn summary_table(
    order: &[String],
    names: &HashMap<String, String>,
    received: &HashMap<String, JobResult>,
) -> String {
    let columns = [
        Column::left("File"),
        Column::left("Status"),
        Column::right("Chars"),
        Column::left("Detail").max_width(PREVIEW_CHARS),
    ];
    let rows: Vec<Vec<String>> = order
        .iter()
        .map(|id| {
            let name = names.get(id).cloned().unwrap_or_default();
            match received.get(id) {
                Some(r) if r.success => vec![
                    name,
                    "ok".to_string(),
                    r.extracted_text.chars().count().to_string(),
                    preview(&r.extracted_text),
                ],
                Some(r) => vec![name, "failed".to_string(), "0".to_string(), r.error_message.clone()],
                None => vec![name, "missing".to_string(), "-".to_string(), String::new()],
            }
        })
        .collect();
    render_table(&columns, &rows)
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS - 3).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_scanned_for_images_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.tiff"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let images = collect_images(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = images.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.tiff"]);
    }

    #[test]
    fn explicit_files_are_kept_whatever_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        let scan = dir.path().join("scan.dat");
        std::fs::write(&scan, b"x").unwrap();

        assert_eq!(collect_images(&[scan.clone()]).unwrap(), vec![scan]);
        assert!(collect_images(&[dir.path().join("missing.png")]).is_err());
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("hello\n  world"), "hello world");
        let long = "word ".repeat(20);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn summary_lists_missing_results() {
        let order = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let names: HashMap<_, _> = [("1", "a.png"), ("2", "b.png"), ("3", "c.png")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut received = HashMap::new();
        received.insert("1".to_string(), JobResult::from_text("1", "Invoice"));
        received.insert("2".to_string(), JobResult::failure("2", "Empty image data"));

        let table = summary_table(&order, &names, &received);
        assert!(table.contains("Invoice"));
        assert!(table.contains("Empty image data"));
        assert!(table.contains("missing"));
    }

    #[test]
    fn json_line_flattens_the_result() {
        let result = JobResult::from_text("id-1", "text");
        let line = ResultLine { file: "a.png", result: &result };
        let value: serde_json::Value = serde_json::to_value(&line).unwrap();
        assert_eq!(value["file"], "a.png");
        assert_eq!(value["image_id"], "id-1");
        assert_eq!(value["success"], true);
    }
}
