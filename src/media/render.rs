//! Render target
//!
//! Holds the most recent decoded video frame of a subscription. The owning
//! subscription is the only writer; any number of readers may poll it.

use parking_lot::Mutex;

use super::decoder::VideoFrame;

#[derive(Debug, Default)]
struct RenderState {
    attached: bool,
    latest: Option<VideoFrame>,
    frames_rendered: u64,
}

/// Playback buffer for decoded video
///
/// Once detached (when its subscription closes) it drops its buffer and
/// ignores further frames.
#[derive(Debug)]
pub struct RenderTarget {
    state: Mutex<RenderState>,
}

impl RenderTarget {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RenderState {
                attached: true,
                ..Default::default()
            }),
        }
    }

    /// Present a decoded frame
    ///
    /// Returns false if the target has been detached.
    pub(crate) fn present(&self, frame: VideoFrame) -> bool {
        let mut state = self.state.lock();
        if !state.attached {
            return false;
        }
        state.frames_rendered += 1;
        state.latest = Some(frame);
        true
    }

    /// Release the buffer
    pub(crate) fn detach(&self) {
        let mut state = self.state.lock();
        state.attached = false;
        state.latest = None;
    }

    /// Whether the target still belongs to an open subscription
    pub fn is_attached(&self) -> bool {
        self.state.lock().attached
    }

    /// Most recent frame
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        self.state.lock().latest.clone()
    }

    /// Dimensions of the most recent frame
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.state
            .lock()
            .latest
            .as_ref()
            .map(|frame| (frame.width, frame.height))
    }

    /// Number of frames presented so far
    pub fn frames_rendered(&self) -> u64 {
        self.state.lock().frames_rendered
    }
}
