//! Stand-in transcoders for tests.
//!
//! Each fake is a shell script run through `/bin/sh`, registered as a tool
//! named `ffmpeg`. The scripts look only at their last argument: a `.mp4`
//! target is treated as a remux, anything else as the live HLS worker whose
//! last argument is the manifest path.

use std::path::Path;

use crate::tools::ToolConfig;

/// How the fake live worker behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Writes one segment right away, consumes stdin, ends the playlist on EOF.
    Segmenting,
    /// Like `Segmenting`, but waits for the first input byte before writing;
    /// exits cleanly without output if the input closes first.
    GatedOnInput,
    /// Prints to stderr and exits 1, for the worker and for remuxing.
    Failing,
    /// Writes one segment, then ignores stdin and sleeps.
    Hanging,
    /// Closes its stdin straight away and keeps running, so input writes fail.
    ClosesInput,
}

const REMUX_CASE: &str = r#"for last; do :; done
case "$last" in
  *.mp4) printf 'mp4-recording' > "$last"; exit 0 ;;
esac
dir=$(dirname "$last")
"#;

const WRITE_SEGMENT: &str = r#"printf 'segment-0' > "$dir/index0.ts"
printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:EVENT\n#EXTINF:4.000000,\nindex0.ts\n' > "$last"
"#;

const END_ON_EOF: &str = r#"cat > /dev/null
printf '#EXT-X-ENDLIST\n' >> "$last"
exit 0
"#;

fn script(behavior: FakeBehavior) -> String {
    match behavior {
        FakeBehavior::Segmenting => format!("{REMUX_CASE}{WRITE_SEGMENT}{END_ON_EOF}"),
        FakeBehavior::GatedOnInput => format!(
            "{REMUX_CASE}[ -n \"$(dd bs=1 count=1 2>/dev/null)\" ] || exit 0\n{WRITE_SEGMENT}{END_ON_EOF}"
        ),
        FakeBehavior::Failing => "echo \"boom: invalid input\" >&2\nexit 1\n".to_string(),
        FakeBehavior::Hanging => format!("{REMUX_CASE}{WRITE_SEGMENT}exec sleep 30\n"),
        FakeBehavior::ClosesInput => format!("{REMUX_CASE}exec 0<&-\nexec sleep 30\n"),
    }
}

/// Write the fake script into `dir` and return a tool config that runs it.
///
/// Panics if the script cannot be written; only meant for tests.
pub fn fake_transcoder(dir: &Path, behavior: FakeBehavior) -> ToolConfig {
    let path = dir.join(format!("fake-ffmpeg-{behavior:?}.sh").to_lowercase());
    std::fs::write(&path, script(behavior)).expect("write fake transcoder script");

    let mut tool = ToolConfig::new("ffmpeg", "/bin/sh");
    tool.prefix_args = vec![path.to_string_lossy().to_string()];
    tool
}

/// Write `count` segments and a matching event playlist into `dir`.
pub fn write_segments(dir: &Path, count: usize) {
    let mut manifest = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:EVENT\n",
    );
    for i in 0..count {
        let name = format!("index{i}.ts");
        std::fs::write(dir.join(&name), format!("segment-{i}")).expect("write segment");
        manifest.push_str(&format!("#EXTINF:4.000000,\n{name}\n"));
    }
    std::fs::write(dir.join(lc_core::paths::MANIFEST_FILE), manifest).expect("write manifest");
}
