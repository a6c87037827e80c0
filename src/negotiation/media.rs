use crate::config::MediaConstraints;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Local audio/video obtained from a capture facility.
pub trait LocalStream: Send + Sync {
    fn tracks(&self) -> Vec<LocalTrack>;

    /// Stops every track. Called exactly once when the call is torn down,
    /// or when the stream arrives after the call was already abandoned.
    fn stop(&mut self);
}

/// Facility that grants access to local media, or refuses it.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Box<dyn LocalStream>>;
}

/// Capture that creates sample-fed tracks without opening any device.
///
/// The negotiated session carries Opus audio and VP8 video; whoever owns the
/// tracks decides what, if anything, is written to them.
pub struct StaticTrackCapture {
    stream_id: String,
}

impl StaticTrackCapture {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }

    fn track(&self, mime_type: &str, id: &str) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            self.stream_id.clone(),
        ))
    }
}

#[async_trait]
impl MediaCapture for StaticTrackCapture {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Box<dyn LocalStream>> {
        if !constraints.audio && !constraints.video {
            return Err(Error::Media("no audio or video requested".into()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.track(MIME_TYPE_OPUS, "audio"));
        }
        if constraints.video {
            tracks.push(self.track(MIME_TYPE_VP8, "video"));
        }
        Ok(Box::new(StaticStream { tracks }))
    }
}

struct StaticStream {
    tracks: Vec<Arc<TrackLocalStaticSample>>,
}

impl LocalStream for StaticStream {
    fn tracks(&self) -> Vec<LocalTrack> {
        self.tracks
            .iter()
            .map(|track| Arc::clone(track) as LocalTrack)
            .collect()
    }

    fn stop(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_capture_honours_constraints() {
        let capture = StaticTrackCapture::new("local");

        let both = capture.acquire(MediaConstraints::default()).await.unwrap();
        let kinds: Vec<_> = both.tracks().iter().map(|t| t.id().to_owned()).collect();
        assert_eq!(kinds, vec!["audio", "video"]);

        let audio_only = capture
            .acquire(MediaConstraints { audio: true, video: false })
            .await
            .unwrap();
        assert_eq!(audio_only.tracks().len(), 1);
    }

    #[tokio::test]
    async fn static_capture_refuses_empty_request() {
        let capture = StaticTrackCapture::new("local");
        let result = capture
            .acquire(MediaConstraints { audio: false, video: false })
            .await;
        assert!(matches!(result, Err(Error::Media(_))));
    }

    #[tokio::test]
    async fn stopped_stream_has_no_tracks() {
        let capture = StaticTrackCapture::new("local");
        let mut stream = capture.acquire(MediaConstraints::default()).await.unwrap();
        stream.stop();
        assert!(stream.tracks().is_empty());
    }
}
