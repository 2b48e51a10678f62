//! Capture source trait

use crate::Result;
use crate::types::{AudioFormat, AudioPacket, ClockDomain, DisplayMode, FormatChange, PixelFormat, VideoFrame};

/// One notification from the capture side.
///
/// An absent frame or packet is a first-class variant: it is how the capture
/// hardware reports that nothing arrived for an interval.
#[derive(Debug)]
pub enum CaptureEvent {
    VideoFrameArrived(Option<VideoFrame>),
    AudioPacketArrived(Option<AudioPacket>),
    FormatChanged(FormatChange),
}

/// Trait for capture sources
///
/// A source delivers events at its own native cadence and handles its own
/// timing. The driver owns the source for the lifetime of a session and hands
/// it back when the session stops.
#[async_trait::async_trait]
pub trait CaptureSource: Send + 'static {
    /// Configure video and audio input.
    ///
    /// Returns the clock domain timestamps will be expressed in. Refusing the
    /// format must be reported as
    /// [`ConfigurationRejected`](crate::RelayError::ConfigurationRejected).
    fn enable(
        &mut self,
        mode: DisplayMode,
        pixel_format: PixelFormat,
        audio: &AudioFormat,
    ) -> Result<ClockDomain>;

    /// Start delivering events.
    fn start(&mut self) -> Result<()>;

    /// Wait for the next event
    ///
    /// Returns:
    /// - `Ok(Some(event))` - Something arrived
    /// - `Ok(None)` - Source ended (normal termination)
    /// - `Err(e)` - Transient failure; the driver retries with backoff
    async fn next_event(&mut self) -> Result<Option<CaptureEvent>>;

    /// Stop streams and disable inputs. Must be idempotent.
    fn stop(&mut self);
}

#[async_trait::async_trait]
impl CaptureSource for Box<dyn CaptureSource> {
    fn enable(
        &mut self,
        mode: DisplayMode,
        pixel_format: PixelFormat,
        audio: &AudioFormat,
    ) -> Result<ClockDomain> {
        (**self).enable(mode, pixel_format, audio)
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    async fn next_event(&mut self) -> Result<Option<CaptureEvent>> {
        (**self).next_event().await
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
