//! Local OCR via an external `ocrmypdf`-compatible command.
//!
//! Scratch objects are files in a working directory. An upload `<id>` is
//! `<id>.pdf`; its conversion `<id>.ocr` is the OCR'd PDF `<id>.ocr.pdf` plus
//! the text sidecar `<id>.ocr.txt`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

use crate::error::ExtractError;
use crate::extract::ScratchDocuments;

/// Default OCR timeout per document.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs `<program> -l <lang> --force-ocr --sidecar <txt> <in.pdf> <out.pdf>`.
pub struct OcrCommandDocuments {
    scratch_dir: PathBuf,
    program: String,
    timeout: Duration,
}

impl OcrCommandDocuments {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            program: "ocrmypdf".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a different OCR program.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn path(&self, id: &str, ext: &str) -> PathBuf {
        self.scratch_dir.join(format!("{id}.{ext}"))
    }

    /// Drop whatever a failed conversion left behind.
    async fn discard_partial(&self, converted_id: &str) {
        if let Err(e) = self.delete(converted_id).await {
            warn!(id = %converted_id, error = %e, "Failed to remove partial OCR output");
        }
    }
}

/// Tesseract wants three-letter codes; map the common two-letter ones.
fn tesseract_language(language: &str) -> &str {
    match language {
        "en" => "eng",
        "de" => "deu",
        "fr" => "fra",
        "es" => "spa",
        "it" => "ita",
        "hi" => "hin",
        other => other,
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl ScratchDocuments for OcrCommandDocuments {
    async fn upload_pdf(&self, name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        let upload = |e: std::io::Error| ExtractError::Upload {
            name: name.to_string(),
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(upload)?;

        let id = Uuid::new_v4().to_string();
        tokio::fs::write(self.path(&id, "pdf"), bytes)
            .await
            .map_err(upload)?;
        Ok(id)
    }

    async fn convert_with_ocr(
        &self,
        source_id: &str,
        language: &str,
    ) -> Result<String, ExtractError> {
        let converted_id = format!("{source_id}.ocr");
        let convert = |reason: String| ExtractError::Convert {
            name: source_id.to_string(),
            reason,
        };

        let mut child = Command::new(&self.program)
            .arg("-l")
            .arg(tesseract_language(language))
            .arg("--force-ocr")
            .arg("--sidecar")
            .arg(self.path(&converted_id, "txt"))
            .arg(self.path(source_id, "pdf"))
            .arg(self.path(&converted_id, "pdf"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| convert(format!("Failed to spawn {}: {e}", self.program)))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                self.discard_partial(&converted_id).await;
                return Err(convert(format!("OCR command failed: {e}")));
            }
            Err(_) => {
                let _ = child.kill().await;
                self.discard_partial(&converted_id).await;
                return Err(convert(format!("timed out after {:?}", self.timeout)));
            }
        };

        if !status.success() {
            self.discard_partial(&converted_id).await;
            return Err(convert(format!(
                "{} exited with code {}",
                self.program,
                status.code().unwrap_or(-1)
            )));
        }
        Ok(converted_id)
    }

    async fn read_text(&self, converted_id: &str) -> Result<String, ExtractError> {
        tokio::fs::read_to_string(self.path(converted_id, "txt"))
            .await
            .map_err(|e| ExtractError::Read {
                id: converted_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn delete(&self, id: &str) -> Result<(), ExtractError> {
        for ext in ["pdf", "txt"] {
            remove_if_present(&self.path(id, ext))
                .await
                .map_err(|e| ExtractError::Cleanup {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_read_delete_round() {
        let dir = tempfile::tempdir().unwrap();
        let docs = OcrCommandDocuments::new(dir.path());

        let id = docs.upload_pdf("label.pdf", b"%PDF-1.4").await.unwrap();
        assert!(dir.path().join(format!("{id}.pdf")).exists());

        let converted = format!("{id}.ocr");
        std::fs::write(dir.path().join(format!("{converted}.txt")), "LABEL 42").unwrap();
        assert_eq!(docs.read_text(&converted).await.unwrap(), "LABEL 42");

        docs.delete(&converted).await.unwrap();
        docs.delete(&id).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_program_is_convert_error() {
        let dir = tempfile::tempdir().unwrap();
        let docs = OcrCommandDocuments::new(dir.path()).with_program("label-relay-no-such-ocr");
        let id = docs.upload_pdf("label.pdf", b"%PDF").await.unwrap();
        let err = docs.convert_with_ocr(&id, "en").await.unwrap_err();
        assert!(matches!(err, ExtractError::Convert { .. }));
    }

    /// Writes an executable stand-in for the OCR program. Its arguments are
    /// `-l <lang> --force-ocr --sidecar <txt> <in.pdf> <out.pdf>`.
    fn fake_ocr(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ocr.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    fn scratch_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.ends_with(".sh"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn successful_conversion_yields_sidecar_text() {
        let tools = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let program = fake_ocr(tools.path(), "printf 'SHIP TO 42' > \"$5\"\ncp \"$6\" \"$7\"");
        let docs = OcrCommandDocuments::new(scratch.path()).with_program(program);

        let id = docs.upload_pdf("label.pdf", b"%PDF").await.unwrap();
        let converted = docs.convert_with_ocr(&id, "en").await.unwrap();
        assert_eq!(converted, format!("{id}.ocr"));
        assert_eq!(docs.read_text(&converted).await.unwrap(), "SHIP TO 42");
    }

    #[tokio::test]
    async fn failed_conversion_removes_partial_outputs() {
        let tools = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let program = fake_ocr(tools.path(), "echo partial > \"$5\"\necho partial > \"$7\"\nexit 1");
        let docs = OcrCommandDocuments::new(scratch.path()).with_program(program);

        let id = docs.upload_pdf("label.pdf", b"%PDF").await.unwrap();
        let err = docs.convert_with_ocr(&id, "en").await.unwrap_err();
        assert!(matches!(err, ExtractError::Convert { ref reason, .. } if reason.contains("code 1")));
        assert_eq!(scratch_entries(scratch.path()), vec![format!("{id}.pdf")]);
    }

    #[tokio::test]
    async fn timed_out_conversion_removes_partial_outputs() {
        let tools = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let program = fake_ocr(tools.path(), "echo partial > \"$5\"\necho partial > \"$7\"\nexec sleep 30");
        let docs = OcrCommandDocuments::new(scratch.path())
            .with_program(program)
            .with_timeout(Duration::from_millis(500));

        let id = docs.upload_pdf("label.pdf", b"%PDF").await.unwrap();
        let err = docs.convert_with_ocr(&id, "en").await.unwrap_err();
        assert!(matches!(err, ExtractError::Convert { ref reason, .. } if reason.contains("timed out")));
        assert_eq!(scratch_entries(scratch.path()), vec![format!("{id}.pdf")]);
    }

    #[tokio::test]
    async fn deleting_absent_object_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let docs = OcrCommandDocuments::new(dir.path());
        docs.delete("never-uploaded").await.unwrap();
    }

    #[test]
    fn two_letter_languages_map_to_tesseract() {
        assert_eq!(tesseract_language("en"), "eng");
        assert_eq!(tesseract_language("eng"), "eng");
    }
}
