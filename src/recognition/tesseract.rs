//! Recognition through the `tesseract` command line tool.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::capture::{decoder, FrameView};
use crate::recognition::{RecognitionError, Recognizer};
use crate::RecognitionConfig;

/// Runs one `tesseract` process per frame, piping an upright grayscale PNG
/// through stdin and reading UTF-8 text from stdout.
///
/// The child is killed if the call is dropped, which is what the worker's
/// timeout does to a stuck recognition.
pub struct TesseractRecognizer {
    config: RecognitionConfig,
}

impl TesseractRecognizer {
    pub fn new(config: RecognitionConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.engine);
        cmd.arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.language)
            .arg("--psm")
            .arg(self.config.page_segmentation.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Decode, rotate upright and PNG-encode a frame for an external OCR tool.
pub fn prepare_image(frame: &FrameView) -> Result<Vec<u8>, RecognitionError> {
    let luma = decoder::decode_luma(&frame.data, &frame.meta)?;
    let upright = decoder::upright(luma, frame.meta.rotation);
    decoder::encode_png(&upright)
}

impl Recognizer for TesseractRecognizer {
    #[instrument(skip_all, fields(sequence = frame.meta.sequence, lang = %self.config.language))]
    async fn recognize(&self, frame: FrameView) -> Result<String, RecognitionError> {
        let png = tokio::task::spawn_blocking(move || prepare_image(&frame))
            .await
            .map_err(|_| RecognitionError::Panicked)??;

        let mut child = self.command().spawn().map_err(|e| {
            RecognitionError::Backend(format!("failed to launch {}: {e}", self.config.engine))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecognitionError::Io("child stdin unavailable".into()))?;
        stdin.write_all(&png).await?;
        // Close stdin so the engine sees end of input
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Backend(format!(
                "{} exited with {}: {}",
                self.config.engine,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = text.chars().count(), "tesseract finished");
        Ok(text)
    }
}
