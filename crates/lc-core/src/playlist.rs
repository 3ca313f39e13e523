//! HLS media playlist model.
//!
//! The transcoder rewrites `index.m3u8` while a stream is live, so a reader
//! may observe a half-written file. [`MediaPlaylist::parse`] therefore treats
//! a trailing line without a newline as incomplete and drops it, together
//! with any `#EXTINF` that is not yet followed by its URI.

use std::fmt::Write;
use std::path::Path;

/// `#EXT-X-PLAYLIST-TYPE` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

/// One media segment entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub duration: f64,
    pub title: String,
    pub uri: String,
    pub discontinuity: bool,
}

/// A parsed media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: Option<u32>,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub playlist_type: Option<PlaylistType>,
    pub segments: Vec<SegmentEntry>,
    pub ended: bool,
}

impl MediaPlaylist {
    /// Parse playlist text. Unknown tags are ignored.
    pub fn parse(text: &str) -> Self {
        let complete = match text.rfind('\n') {
            Some(idx) => &text[..=idx],
            None => "",
        };

        let mut playlist = MediaPlaylist {
            version: None,
            target_duration: 0,
            media_sequence: 0,
            playlist_type: None,
            segments: Vec::new(),
            ended: false,
        };
        let mut pending: Option<(f64, String)> = None;
        let mut discontinuity = false;

        for line in complete.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(v) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = v.trim().parse().ok();
            } else if let Some(v) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                playlist.playlist_type = match v.trim() {
                    "VOD" => Some(PlaylistType::Vod),
                    "EVENT" => Some(PlaylistType::Event),
                    _ => None,
                };
            } else if let Some(v) = line.strip_prefix("#EXTINF:") {
                let (duration, title) = v.split_once(',').unwrap_or((v, ""));
                pending = Some((duration.trim().parse().unwrap_or(0.0), title.to_string()));
            } else if line == "#EXT-X-DISCONTINUITY" {
                discontinuity = true;
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            } else if line.starts_with('#') {
                continue;
            } else if let Some((duration, title)) = pending.take() {
                playlist.segments.push(SegmentEntry {
                    duration,
                    title,
                    uri: line.to_string(),
                    discontinuity: std::mem::take(&mut discontinuity),
                });
            }
        }

        playlist
    }

    /// Keep only segments for which `keep` returns true.
    ///
    /// Dropping anything also clears `ended`, since the playlist no longer
    /// describes the complete recording.
    pub fn retain_segments(&mut self, mut keep: impl FnMut(&SegmentEntry) -> bool) {
        let before = self.segments.len();
        self.segments.retain(|s| keep(s));
        if self.segments.len() != before {
            self.ended = false;
        }
    }

    /// Read the manifest at `manifest` and keep only segments whose files
    /// are present in `dir`. URIs that point outside `dir` are dropped.
    pub async fn read_available(manifest: &Path, dir: &Path) -> std::io::Result<Self> {
        let text = tokio::fs::read_to_string(manifest).await?;
        let mut playlist = Self::parse(&text);

        let mut present = Vec::with_capacity(playlist.segments.len());
        for segment in &playlist.segments {
            let uri = segment.uri.as_str();
            let local = !(uri.contains('/') || uri.contains('\\') || uri.starts_with('.'));
            present.push(local && tokio::fs::try_exists(dir.join(uri)).await.unwrap_or(false));
        }
        let mut flags = present.into_iter();
        playlist.retain_segments(|_| flags.next().unwrap_or(false));
        Ok(playlist)
    }

    /// Serialise back to M3U8 text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let target = self.target_duration.max(
            self.segments
                .iter()
                .map(|s| s.duration.ceil() as u64)
                .max()
                .unwrap_or(0),
        );

        let _ = writeln!(out, "#EXTM3U");
        if let Some(version) = self.version {
            let _ = writeln!(out, "#EXT-X-VERSION:{version}");
        }
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{target}");
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);
        match self.playlist_type {
            Some(PlaylistType::Vod) => {
                let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD");
            }
            Some(PlaylistType::Event) => {
                let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:EVENT");
            }
            None => {}
        }
        for segment in &self.segments {
            if segment.discontinuity {
                let _ = writeln!(out, "#EXT-X-DISCONTINUITY");
            }
            let _ = writeln!(out, "#EXTINF:{:.6},{}", segment.duration, segment.title);
            let _ = writeln!(out, "{}", segment.uri);
        }
        if self.ended {
            let _ = writeln!(out, "#EXT-X-ENDLIST");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFMPEG_EVENT: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:25\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXT-X-PLAYLIST-TYPE:EVENT\n\
#EXTINF:25.000000,\n\
index0.ts\n\
#EXTINF:24.960000,\n\
index1.ts\n";

    #[test]
    fn parses_ffmpeg_event_playlist() {
        let pl = MediaPlaylist::parse(FFMPEG_EVENT);
        assert_eq!(pl.version, Some(3));
        assert_eq!(pl.target_duration, 25);
        assert_eq!(pl.playlist_type, Some(PlaylistType::Event));
        assert_eq!(pl.segments.len(), 2);
        assert_eq!(pl.segments[1].uri, "index1.ts");
        assert!((pl.segments[1].duration - 24.96).abs() < 1e-9);
        assert!(!pl.ended);
    }

    #[test]
    fn partial_trailing_line_is_ignored() {
        let text = format!("{FFMPEG_EVENT}#EXTINF:25.000000,\nindex2.t");
        let pl = MediaPlaylist::parse(&text);
        assert_eq!(pl.segments.len(), 2);

        let dangling = format!("{FFMPEG_EVENT}#EXTINF:25.000000,\n");
        assert_eq!(MediaPlaylist::parse(&dangling).segments.len(), 2);
    }

    #[test]
    fn endlist_and_discontinuity() {
        let text = format!("{FFMPEG_EVENT}#EXT-X-DISCONTINUITY\n#EXTINF:3.0,\nindex2.ts\n#EXT-X-ENDLIST\n");
        let pl = MediaPlaylist::parse(&text);
        assert!(pl.ended);
        assert!(pl.segments[2].discontinuity);
        assert!(!pl.segments[1].discontinuity);
    }

    #[test]
    fn retain_clears_endlist_when_dropping() {
        let mut pl = MediaPlaylist::parse(&format!("{FFMPEG_EVENT}#EXT-X-ENDLIST\n"));
        pl.retain_segments(|_| true);
        assert!(pl.ended);
        pl.retain_segments(|s| s.uri != "index1.ts");
        assert_eq!(pl.segments.len(), 1);
        assert!(!pl.ended);
    }

    #[test]
    fn render_reparses_to_same_playlist() {
        let pl = MediaPlaylist::parse(FFMPEG_EVENT);
        let rendered = pl.render();
        assert!(rendered.starts_with("#EXTM3U\n"));
        assert!(rendered.contains("#EXT-X-PLAYLIST-TYPE:EVENT\n"));
        assert_eq!(MediaPlaylist::parse(&rendered), pl);
    }

    #[tokio::test]
    async fn read_available_filters_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("index.m3u8");
        std::fs::write(&manifest, format!("{FFMPEG_EVENT}#EXTINF:1.0,\n../escape.ts\n")).unwrap();
        std::fs::write(dir.path().join("index0.ts"), b"seg").unwrap();

        let pl = MediaPlaylist::read_available(&manifest, dir.path()).await.unwrap();
        assert_eq!(pl.segments.len(), 1);
        assert_eq!(pl.segments[0].uri, "index0.ts");
    }

    #[tokio::test]
    async fn read_available_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = MediaPlaylist::read_available(&dir.path().join("index.m3u8"), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn empty_input() {
        let pl = MediaPlaylist::parse("");
        assert!(pl.segments.is_empty());
        assert_eq!(pl.target_duration, 0);
    }
}
