//! Live HLS packaging arguments.
//!
//! The worker reads the published container from stdin, copies video,
//! re-encodes audio, and writes an event playlist plus `.ts` segments into
//! the stream directory. `temp_file` makes ffmpeg write each segment (and
//! the playlist) under a `.tmp` name and rename it once complete, so a
//! segment listed in the manifest is always whole on disk.

use lc_core::config::MediaConfig;
use lc_core::StreamPaths;

/// Parameters for the live HLS worker.
#[derive(Debug, Clone)]
pub struct HlsSettings {
    pub segment_duration_secs: u32,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Container of the published bytes; `None` lets ffmpeg probe.
    pub input_format: Option<String>,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for HlsSettings {
    fn from(media: &MediaConfig) -> Self {
        Self {
            segment_duration_secs: media.segment_duration_secs,
            audio_codec: media.audio_codec.clone(),
            audio_bitrate: media.audio_bitrate.clone(),
            input_format: media.input_format.clone(),
        }
    }
}

impl HlsSettings {
    /// Build the ffmpeg argument list for a stream.
    pub fn args(&self, paths: &StreamPaths) -> Vec<String> {
        let mut args: Vec<String> =
            vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];

        if let Some(ref fmt) = self.input_format {
            args.extend(["-f".into(), fmt.clone()]);
        }
        args.extend(["-i".into(), "pipe:0".into()]);

        args.extend([
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            self.audio_codec.clone(),
            "-b:a".into(),
            self.audio_bitrate.clone(),
        ]);

        args.extend(["-f".into(), "hls".into()]);
        if self.segment_duration_secs > 0 {
            args.extend(["-hls_time".into(), self.segment_duration_secs.to_string()]);
        }
        args.extend([
            "-hls_playlist_type".into(),
            "event".into(),
            "-hls_flags".into(),
            "temp_file+append_list".into(),
            "-hls_segment_filename".into(),
            paths.dir.join("index%d.ts").to_string_lossy().to_string(),
            paths.manifest_path.to_string_lossy().to_string(),
        ]);

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::StreamDirectories;

    fn paths() -> StreamPaths {
        StreamDirectories::new("/srv/media", "/srv/video").resolve(&"abc123".parse().unwrap())
    }

    #[test]
    fn default_args() {
        let args = HlsSettings::default().args(&paths());
        let joined = args.join(" ");
        assert!(joined.contains("-i pipe:0"));
        assert!(joined.contains("-c:v copy -c:a aac -b:a 128k"));
        assert!(joined.contains("-hls_time 25"));
        assert!(joined.contains("-hls_playlist_type event"));
        assert!(joined.contains("-hls_segment_filename /srv/media/abc123/index%d.ts"));
        assert_eq!(args.last().unwrap(), "/srv/media/abc123/index.m3u8");
        assert!(!args.iter().any(|a| a == "flv"));
    }

    #[test]
    fn input_format_precedes_input() {
        let settings = HlsSettings {
            input_format: Some("flv".into()),
            ..HlsSettings::default()
        };
        let args = settings.args(&paths());
        let f = args.iter().position(|a| a == "flv").unwrap();
        let i = args.iter().position(|a| a == "pipe:0").unwrap();
        assert!(f < i);
    }

    #[test]
    fn from_media_config() {
        let media = MediaConfig {
            segment_duration_secs: 4,
            audio_codec: "libopus".into(),
            ..MediaConfig::default()
        };
        let settings = HlsSettings::from(&media);
        let joined = settings.args(&paths()).join(" ");
        assert!(joined.contains("-hls_time 4"));
        assert!(joined.contains("-c:a libopus"));
    }
}
