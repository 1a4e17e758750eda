//! Image acquisition: prepare, trigger, collect, restore.

use std::sync::atomic::{AtomicBool, Ordering};

use semlink_frame::commands::{SC_SCAN_XY, SC_SET_ACCUM, SC_SET_SPEED, SC_STOP_SCAN, TCP_REG_DATA_PORT};
use semlink_frame::{Args, WireReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::SemClient;
use crate::error::{ClientError, Result};
use crate::ops::{check_status, to_i32};
use crate::reassembly::{CollectOutcome, Reassembler};

/// Region of interest in scan coordinates.
///
/// `right == 0` and `bottom == 0` mean "to the last column/row".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Parameters of one acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    pub width: u32,
    pub height: u32,
    /// Scan speed index; `0` keeps the instrument's current speed.
    #[serde(default)]
    pub dwell: u32,
    /// Frames accumulated per image; values up to `1` leave it unchanged.
    #[serde(default = "default_frames")]
    pub frames: u32,
    /// Channel ids in output order.
    pub channels: Vec<i32>,
    #[serde(default)]
    pub roi: Roi,
}

fn default_frames() -> u32 {
    1
}

impl AcquisitionRequest {
    pub fn new(width: u32, height: u32, channels: impl Into<Vec<i32>>) -> Self {
        Self {
            width,
            height,
            dwell: 0,
            frames: 1,
            channels: channels.into(),
            roi: Roi::default(),
        }
    }

    pub fn with_dwell(mut self, dwell: u32) -> Self {
        self.dwell = dwell;
        self
    }

    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = roi;
        self
    }

    /// The region with zero right/bottom replaced by the last column/row.
    pub fn effective_roi(&self) -> Roi {
        Roi {
            left: self.roi.left,
            top: self.roi.top,
            right: if self.roi.right > 0 {
                self.roi.right
            } else {
                self.width.saturating_sub(1)
            },
            bottom: if self.roi.bottom > 0 {
                self.roi.bottom
            } else {
                self.height.saturating_sub(1)
            },
        }
    }

    /// Bytes per channel at 8 bits per pixel.
    pub fn expected_bytes(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check the request and return its effective ROI.
    pub fn validate(&self) -> Result<Roi> {
        if self.width == 0 || self.height == 0 {
            return Err(invalid(format!(
                "image size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        to_i32(self.width, "width")?;
        to_i32(self.height, "height")?;
        to_i32(self.dwell, "dwell")?;
        to_i32(self.frames, "frames")?;
        if self.channels.is_empty() {
            return Err(invalid("at least one channel is required".to_string()));
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if *channel < 0 {
                return Err(invalid(format!("channel id {channel} is negative")));
            }
            if self.channels[..i].contains(channel) {
                return Err(invalid(format!("channel {channel} requested twice")));
            }
        }

        let roi = self.effective_roi();
        if roi.left > roi.right || roi.right >= self.width {
            return Err(invalid(format!(
                "roi columns {}..={} outside 0..{}",
                roi.left, roi.right, self.width
            )));
        }
        if roi.top > roi.bottom || roi.bottom >= self.height {
            return Err(invalid(format!(
                "roi rows {}..={} outside 0..{}",
                roi.top, roi.bottom, self.height
            )));
        }
        Ok(roi)
    }
}

fn invalid(reason: String) -> ClientError {
    ClientError::InvalidRequest(reason)
}

/// One reassembled channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub channel: i32,
    pub width: u32,
    pub height: u32,
    /// Contiguous bytes received from the start of the buffer.
    pub received: usize,
    /// Every byte arrived before the deadline.
    pub complete: bool,
    /// `width * height` bytes; missing pixels are zero.
    pub data: Vec<u8>,
}

/// Claim on the single acquisition slot of a client.
struct AcquisitionSlot<'a>(&'a AtomicBool);

impl<'a> AcquisitionSlot<'a> {
    fn claim(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ClientError::AcquisitionInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for AcquisitionSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scoped override of UI-driven scanning.
///
/// `release` re-enables it and reports the outcome. If the guard is dropped
/// without `release` (a panic unwinding through the acquisition) the restore
/// is still attempted and only logged.
struct ScanModeOverride<'a> {
    client: &'a SemClient,
    released: bool,
}

impl<'a> ScanModeOverride<'a> {
    fn new(client: &'a SemClient) -> Self {
        Self {
            client,
            released: false,
        }
    }

    fn engage(&mut self) -> Result<()> {
        self.client.set_gui_scanning(false)
    }

    fn release(mut self) -> Result<()> {
        self.released = true;
        self.client.set_gui_scanning(true)
    }
}

impl Drop for ScanModeOverride<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.client.set_gui_scanning(true) {
                warn!(error = %err, "failed to restore scanning mode");
            }
        }
    }
}

impl SemClient {
    /// Acquire one image per requested channel.
    ///
    /// Channels that received no bytes at all are left out. A collection
    /// timeout is not an error: incomplete channels come back with
    /// `complete == false` and a zero-filled remainder.
    ///
    /// UI-driven scanning is disabled for the duration and always
    /// re-enabled. If both the acquisition and the restore fail, the
    /// acquisition's error is returned.
    pub fn acquire_images(&self, request: &AcquisitionRequest) -> Result<Vec<Image>> {
        let roi = request.validate()?;
        self.ensure_connected()?;
        let _slot = AcquisitionSlot::claim(&self.acquiring)?;
        info!(
            width = request.width,
            height = request.height,
            channels = ?request.channels,
            "acquisition started"
        );

        self.open_data_channel()?;
        for &channel in &request.channels {
            self.enable_channel(channel, true)?;
        }

        let mut scan_mode = ScanModeOverride::new(self);
        let outcome = scan_mode
            .engage()
            .and_then(|()| self.scan(request, roi));
        let restored = scan_mode.release();

        match (outcome, restored) {
            (Ok(images), Ok(())) => Ok(images),
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore_err)) => {
                warn!(error = %restore_err, "failed to restore scanning mode");
                Err(err)
            }
        }
    }

    /// Open the data connection and register its port with the instrument.
    fn open_data_channel(&self) -> Result<()> {
        let opened = {
            let mut data = self.lock_data()?;
            data.ensure_open()
        };
        let Some(local_port) = self.track(opened)? else {
            return Ok(());
        };

        let args = Args::new().int(i32::from(local_port)).finish();
        if let Err(err) = self.send(TCP_REG_DATA_PORT, &args) {
            if let Ok(mut data) = self.lock_data() {
                data.close();
            }
            return Err(err);
        }
        Ok(())
    }

    fn scan(&self, request: &AcquisitionRequest, roi: Roi) -> Result<Vec<Image>> {
        self.with_command(|channel| {
            check_status(SC_STOP_SCAN, &channel.send(SC_STOP_SCAN, &[])?)?;
            if request.dwell > 0 {
                let args = Args::new().int(to_i32(request.dwell, "dwell")?).finish();
                check_status(SC_SET_SPEED, &channel.send(SC_SET_SPEED, &args)?)?;
            }
            if request.frames > 1 {
                let args = Args::new().int(to_i32(request.frames, "frames")?).finish();
                check_status(SC_SET_ACCUM, &channel.send(SC_SET_ACCUM, &args)?)?;
            }
            Ok(())
        })?;

        let frame_id = self.trigger(request, roi)?;
        debug!(frame_id, "scan triggered");

        self.collect(request)
    }

    fn trigger(&self, request: &AcquisitionRequest, roi: Roi) -> Result<i32> {
        let args = Args::new()
            .int(to_i32(request.width, "width")?)
            .int(to_i32(request.height, "height")?)
            .int(to_i32(roi.left, "roi left")?)
            .int(to_i32(roi.top, "roi top")?)
            .int(to_i32(roi.right, "roi right")?)
            .int(to_i32(roi.bottom, "roi bottom")?)
            .int(1)
            .finish();
        let body = self.send(SC_SCAN_XY, &args)?;
        let frame_id = WireReader::new(&body).i32()?;
        if frame_id < 0 {
            return Err(ClientError::CommandFailure {
                command: SC_SCAN_XY.to_string(),
                code: frame_id,
            });
        }
        Ok(frame_id)
    }

    fn collect(&self, request: &AcquisitionRequest) -> Result<Vec<Image>> {
        let timeout = self.config().collect_timeout(self.endpoint().timeout);
        let mut reassembler = Reassembler::new(&request.channels, request.expected_bytes());

        let outcome = {
            let mut data = self.lock_data()?;
            reassembler.collect(&mut *data, self.clock(), timeout, self.cancel())
        };
        let outcome = self.track(outcome)?;

        let mut channels = reassembler.into_channels();
        let images: Vec<Image> = request
            .channels
            .iter()
            .filter_map(|id| channels.remove(id).map(|acc| (*id, acc)))
            .filter(|(_, acc)| acc.bytes_written() > 0)
            .map(|(channel, acc)| Image {
                channel,
                width: request.width,
                height: request.height,
                received: acc.received(),
                complete: acc.is_complete(),
                data: acc.into_bytes(),
            })
            .collect();

        info!(
            images = images.len(),
            complete = outcome == CollectOutcome::Complete,
            "acquisition finished"
        );
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_right_bottom_default_to_last_pixel() {
        let req = AcquisitionRequest::new(256, 256, vec![0]);
        assert_eq!(
            req.effective_roi(),
            Roi {
                left: 0,
                top: 0,
                right: 255,
                bottom: 255
            }
        );
        assert_eq!(req.expected_bytes(), 65_536);
    }

    #[test]
    fn explicit_roi_is_kept() {
        let roi = Roi {
            left: 10,
            top: 20,
            right: 100,
            bottom: 0,
        };
        let req = AcquisitionRequest::new(128, 64, vec![0]).with_roi(roi);
        let effective = req.validate().expect("valid request");
        assert_eq!((effective.right, effective.bottom), (100, 63));
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let cases = [
            AcquisitionRequest::new(0, 10, vec![0]),
            AcquisitionRequest::new(10, 0, vec![0]),
            AcquisitionRequest::new(10, 10, Vec::new()),
            AcquisitionRequest::new(10, 10, vec![0, 0]),
            AcquisitionRequest::new(10, 10, vec![-1]),
            AcquisitionRequest::new(10, 10, vec![0]).with_roi(Roi {
                left: 0,
                top: 0,
                right: 10,
                bottom: 0,
            }),
            AcquisitionRequest::new(10, 10, vec![0]).with_roi(Roi {
                left: 5,
                top: 8,
                right: 4,
                bottom: 9,
            }),
            AcquisitionRequest::new(u32::MAX, 1, vec![0]),
        ];
        for req in cases {
            let err = req.validate().expect_err("request should be invalid");
            assert!(matches!(err, ClientError::InvalidRequest(_)), "{req:?}");
        }
    }

    #[test]
    fn request_document_defaults() {
        let req: AcquisitionRequest =
            serde_json::from_str(r#"{"width": 64, "height": 32, "channels": [0, 1]}"#)
                .expect("request should parse");
        assert_eq!(req.frames, 1);
        assert_eq!(req.dwell, 0);
        assert_eq!(req.roi, Roi::default());
    }

    #[test]
    fn acquisition_slot_is_exclusive() {
        let flag = AtomicBool::new(false);
        let slot = AcquisitionSlot::claim(&flag).expect("first claim");
        assert!(matches!(
            AcquisitionSlot::claim(&flag),
            Err(ClientError::AcquisitionInProgress)
        ));
        drop(slot);
        assert!(AcquisitionSlot::claim(&flag).is_ok());
    }
}
