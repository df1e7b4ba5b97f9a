use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::upload::UploadEvent;

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct ProgressData {
    /// Bytes the video host has acknowledged
    pub bytes_uploaded: u64,
    pub total_bytes: Option<u64>,
    pub speed_mbps: f64,
    pub eta_seconds: f64,
    pub percent: f64,
}

/// Percent complete. Never `NaN` or negative; an unknown total reports a nominal value.
pub fn percent_complete(bytes_uploaded: u64, total_bytes: Option<u64>) -> f64 {
    match total_bytes {
        None => constants::NOMINAL_PROGRESS_PERCENT,
        Some(0) => 100.0,
        Some(total) => ((bytes_uploaded as f64 / total as f64) * 100.0).clamp(0.0, 100.0),
    }
}

/// Turns acknowledged offsets into throttled, monotonic progress events.
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<UploadEvent>,
    bytes_uploaded: u64,
    /// Offset the session started at; speed only counts bytes sent since then
    resumed_from: u64,
    total_bytes: Option<u64>,
    start_time: Instant,
    last_update_time: Option<Instant>,
}
impl ProgressSender {
    pub fn new(
        tx: mpsc::UnboundedSender<UploadEvent>,
        total_bytes: Option<u64>,
        resumed_from: u64,
    ) -> Self {
        Self {
            tx,
            bytes_uploaded: resumed_from,
            resumed_from,
            total_bytes,
            start_time: Instant::now(),
            last_update_time: None,
        }
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    /// Records a newly acknowledged offset. Offsets lower than one already reported are ignored.
    pub fn set_bytes_uploaded(&mut self, bytes: u64) {
        if bytes < self.bytes_uploaded {
            tracing::warn!(
                "Ignoring progress regression from {} to {bytes} bytes",
                self.bytes_uploaded
            );
            return;
        }
        self.bytes_uploaded = bytes;
        self.send();
    }

    pub fn send(&mut self) {
        let due = self
            .last_update_time
            .is_none_or(|t| t.elapsed() >= constants::PROGRESS_REPORT_INTERVAL);
        if due {
            self.flush();
        }
    }

    /// Sends the current progress regardless of throttling.
    pub fn flush(&mut self) {
        self.tx.send(UploadEvent::Progress(self.data())).ok();
        self.last_update_time = Some(Instant::now());
    }

    fn data(&self) -> ProgressData {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let sent = self.bytes_uploaded.saturating_sub(self.resumed_from);
        let bps = if elapsed > 0.0 { sent as f64 / elapsed } else { 0.0 };
        ProgressData {
            bytes_uploaded: self.bytes_uploaded,
            total_bytes: self.total_bytes,
            speed_mbps: bps / (1024.0 * 1024.0),
            eta_seconds: match self.total_bytes {
                Some(total) if bps > 0.0 => total.saturating_sub(self.bytes_uploaded) as f64 / bps,
                _ => 0.0,
            },
            percent: percent_complete(self.bytes_uploaded, self.total_bytes),
        }
    }
}
