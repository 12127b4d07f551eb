use super::interface::{Detector, DetectorSettings};
use crate::error::{LiveDetectError, Result};
use crate::frame::{BoundingBox, Detection, Frame};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

/// Header line sent ahead of the raw RGB bytes of every frame
#[derive(Debug, Serialize)]
struct InferRequest {
    frame: u64,
    width: u32,
    height: u32,
    format: &'static str,
    confidence_threshold: f32,
    iou_threshold: f32,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    class_id: u32,
    #[serde(default)]
    label: Option<String>,
    confidence: f32,
    bbox: [f32; 4],
}

/// Talks to a long-running model server over its stdin/stdout.
///
/// The server is spawned once and reused for every frame of every session.
/// Per frame it receives one JSON header line followed by `width * height * 3`
/// RGB bytes, and answers with one JSON line:
/// `{"detections": [{"class_id": 0, "label": "person", "confidence": 0.91, "bbox": [x0, y0, x1, y1]}]}`.
pub struct ProcessDetector {
    program: String,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    labels: Vec<String>,
}

impl ProcessDetector {
    pub fn spawn(command: &[String], labels: Vec<String>) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| LiveDetectError::invalid_config("detector.command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                LiveDetectError::detector(format!("failed to spawn model server {}: {}", program, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LiveDetectError::detector("model server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LiveDetectError::detector("model server stdout unavailable"))?;

        info!("Spawned model server {} (pid {})", program, child.id());

        Ok(Self {
            program: program.clone(),
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            labels,
        })
    }

    fn send_frame(&mut self, frame: &Frame, settings: &DetectorSettings) -> std::io::Result<()> {
        let request = InferRequest {
            frame: frame.index,
            width: frame.width(),
            height: frame.height(),
            format: "rgb24",
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
        };
        serde_json::to_writer(&mut self.stdin, &request)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.write_all(frame.image.as_raw())?;
        self.stdin.flush()
    }
}

impl Detector for ProcessDetector {
    fn infer(&mut self, frame: &Frame, settings: &DetectorSettings) -> Result<Vec<Detection>> {
        self.send_frame(frame, settings).map_err(|e| {
            LiveDetectError::detector(format!("failed to send frame {}: {}", frame.index, e))
        })?;

        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).map_err(|e| {
            LiveDetectError::detector(format!("failed to read model response: {}", e))
        })?;
        if read == 0 {
            return Err(LiveDetectError::detector(format!(
                "model server {} closed its output",
                self.program
            )));
        }

        let detections = parse_response(&line, &self.labels)?;
        debug!(
            "Model returned {} detections for frame {}",
            detections.len(),
            frame.index
        );
        Ok(detections)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

impl Drop for ProcessDetector {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Model server already exited: {}", e);
        }
        match self.child.wait() {
            Ok(status) => debug!("Model server {} exited with {}", self.program, status),
            Err(e) => warn!("Failed to reap model server {}: {}", self.program, e),
        }
    }
}

/// Decode one response line, filling in labels from the class table
pub(crate) fn parse_response(line: &str, labels: &[String]) -> Result<Vec<Detection>> {
    let response: InferResponse = serde_json::from_str(line.trim())
        .map_err(|e| LiveDetectError::detector(format!("malformed model response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(LiveDetectError::detector(format!("model error: {}", error)));
    }

    Ok(response
        .detections
        .into_iter()
        .map(|wire| {
            let label = wire
                .label
                .or_else(|| labels.get(wire.class_id as usize).cloned())
                .unwrap_or_else(|| format!("class{}", wire.class_id));
            let [x0, y0, x1, y1] = wire.bbox;
            Detection::new(
                wire.class_id,
                label,
                wire.confidence,
                BoundingBox::new(x0, y0, x1, y1),
            )
        })
        .collect())
}
