use crate::config::ClassifierConfig;
use crate::label::clean_breed_label;
use crate::scratch::{ScratchError, ScratchStore};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Scratch storage failed: {0}")]
    Storage(#[from] ScratchError),
    #[error("Failed to launch classifier `{command}`: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },
    #[error("Classifier produced no usable result: {0}")]
    Classification(String),
    #[error("Classifier exceeded the {0:?} deadline")]
    Timeout(Duration),
}

impl ClassifierError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Storage(_) => "storage",
            ClassifierError::Launch { .. } => "launch",
            ClassifierError::Classification(_) => "classification",
            ClassifierError::Timeout(_) => "timeout",
        }
    }
}

/// One ranked breed prediction as returned to the client.
///
/// `breed` is the raw tag emitted by the classifier; `label` is the cleaned
/// display name derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionEntry {
    pub breed: String,
    pub label: String,
    pub confidence: f64,
}

#[derive(Deserialize)]
struct RawPrediction {
    breed: String,
    confidence: f64,
}

/// Bridges an uploaded image to the external classifier process.
///
/// Each call owns its scratch file and child process end to end; nothing is
/// shared between concurrent classifications except the scratch directory.
pub struct ClassifierService {
    scratch: ScratchStore,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ClassifierService {
    pub async fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let scratch = ScratchStore::new(config.scratch_dir.clone()).await?;
        Ok(Self {
            scratch,
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: config.get_timeout(),
        })
    }

    /// Runs one classification: persist the upload, invoke the classifier
    /// with the file path, parse its stdout, and return the entries sorted
    /// by descending confidence (stable, so ties keep emission order).
    ///
    /// The scratch file is deleted on every exit path, strictly after the
    /// child process has terminated.
    #[instrument(skip(self, image, mime_type))]
    pub async fn classify(
        &self,
        image: Bytes,
        mime_type: Option<&str>,
    ) -> Result<Vec<PredictionEntry>, ClassifierError> {
        let scratch = match self.scratch.persist(&image, mime_type).await {
            Ok(file) => file,
            Err(err) => {
                // A transient write failure is worth one more attempt; a
                // failed model run is not.
                tracing::warn!(error = %err, "scratch write failed, retrying once");
                self.scratch.persist(&image, mime_type).await?
            }
        };

        let outcome = self.run_classifier(scratch.path()).await;
        let cleanup = scratch.remove().await;
        if let Err(err) = &cleanup {
            tracing::error!(error = %err, "failed to remove scratch file");
        }

        let stdout = outcome?;
        cleanup?;

        let mut entries = parse_predictions(&stdout)?;
        entries.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(entries)
    }

    async fn run_classifier(&self, image_path: &Path) -> Result<String, ClassifierError> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(image_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClassifierError::Launch {
                command: self.command.clone(),
                source,
            })?;

        // Dropping the wait future on expiry kills the child via kill_on_drop.
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ClassifierError::Timeout(self.timeout))?
            .map_err(|err| {
                ClassifierError::Classification(format!("failed to collect output: {err}"))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::warn!(stderr = %stderr.trim(), "classifier diagnostics");
        }

        if !output.status.success() {
            return Err(ClassifierError::Classification(format!(
                "classifier exited with {}",
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn parse_predictions(stdout: &str) -> Result<Vec<PredictionEntry>, ClassifierError> {
    let raw: Vec<RawPrediction> = serde_json::from_str(stdout.trim())
        .map_err(|err| ClassifierError::Classification(format!("invalid output: {err}")))?;

    if raw.is_empty() {
        return Err(ClassifierError::Classification(
            "classifier emitted no predictions".into(),
        ));
    }

    raw.into_iter()
        .map(|entry| {
            if !entry.confidence.is_finite() || !(0.0..=1.0).contains(&entry.confidence) {
                return Err(ClassifierError::Classification(format!(
                    "confidence {} for `{}` is outside [0, 1]",
                    entry.confidence, entry.breed
                )));
            }
            Ok(PredictionEntry {
                label: clean_breed_label(&entry.breed),
                breed: entry.breed,
                confidence: entry.confidence,
            })
        })
        .collect()
}
